//! Vector column catalog
//!
//! Reads the catalog of declared vector columns, keeps the ones marked
//! `online` and resolves the ordinals of their id and vector columns from
//! `information_schema`.

use tracing::{debug, warn};
use vecsync_binlog::{Row, WireError};
use vecsync_core::Options;

use super::source::BinlogConnection;

/// A vector column maintained from the binlog.
#[derive(Debug, Clone)]
pub struct CatalogColumn {
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Vector column name
    pub column: String,
    /// Parsed `info` options of the column
    pub options: Options,
    /// Name of the id column (`idcol` option)
    pub id_column: String,
}

/// Resolved 1-based ordinals of a catalogued column pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOrdinals {
    /// Id column ordinal
    pub id: u32,
    /// Vector column ordinal
    pub vector: u32,
}

/// Read every online column from `schema.table`.
///
/// Rows with missing fields, unparsable options, `online` unset or no
/// `idcol` are skipped with a log line.
pub fn read_catalog(
    conn: &mut dyn BinlogConnection,
    schema: &str,
    table: &str,
) -> Result<Vec<CatalogColumn>, WireError> {
    let sql = format!(
        "SELECT db, tbl, col, info FROM {}.{}",
        quote_identifier(schema),
        quote_identifier(table)
    );
    let rows = conn.query_rows(&sql)?;
    debug!(rows = rows.len(), catalog = %format!("{schema}.{table}"), "read vector column catalog");
    Ok(rows.into_iter().filter_map(parse_catalog_row).collect())
}

fn parse_catalog_row(row: Row) -> Option<CatalogColumn> {
    let mut fields = row.into_iter();
    let mut next = || fields.next().flatten().filter(|f| !f.is_empty());
    let (database, table, column, info) = match (next(), next(), next(), next()) {
        (Some(db), Some(t), Some(c), Some(info)) => (db, t, c, info),
        _ => {
            debug!("skipping incomplete catalog row");
            return None;
        }
    };

    let options = match Options::try_parse(&info) {
        Ok(options) => options,
        Err(e) => {
            warn!(db = %database, table = %table, column = %column, error = %e, "invalid vector column options");
            return None;
        }
    };
    if !options.get_bool("online") {
        debug!(db = %database, table = %table, column = %column, "vector column is not online");
        return None;
    }
    let id_column = match options.get("idcol") {
        Some(id) => id.to_string(),
        None => {
            warn!(db = %database, table = %table, column = %column, "online vector column has no idcol");
            return None;
        }
    };

    Some(CatalogColumn {
        database,
        table,
        column,
        options,
        id_column,
    })
}

/// Look up the ordinal positions of the id and vector columns.
///
/// Returns `None` when either column does not exist.
pub fn resolve_ordinals(
    conn: &mut dyn BinlogConnection,
    column: &CatalogColumn,
) -> Result<Option<ColumnOrdinals>, WireError> {
    let sql = format!(
        "SELECT column_name, ordinal_position FROM information_schema.columns \
         WHERE table_schema = '{}' AND table_name = '{}' AND column_name IN ('{}', '{}')",
        escape_literal(&column.database),
        escape_literal(&column.table),
        escape_literal(&column.id_column),
        escape_literal(&column.column),
    );

    let mut id = 0;
    let mut vector = 0;
    for row in conn.query_rows(&sql)? {
        let (Some(Some(name)), Some(Some(ordinal))) = (row.first(), row.get(1)) else {
            continue;
        };
        let Ok(ordinal) = ordinal.parse::<u32>() else {
            continue;
        };
        // Column names compare case-insensitively in MySQL.
        if name.eq_ignore_ascii_case(&column.id_column) {
            id = ordinal;
        }
        if name.eq_ignore_ascii_case(&column.column) {
            vector = ordinal;
        }
    }

    if id == 0 || vector == 0 {
        return Ok(None);
    }
    Ok(Some(ColumnOrdinals { id, vector }))
}

/// Quote `name` as a backtick-delimited identifier, doubling any backtick
/// inside it.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Escape `value` for use inside a single-quoted SQL string literal.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out
}

//! Bulk build and refresh of a vector index over SQL
//!
//! A build reads every `(id, vector)` pair of a table on its own connection
//! while the table is read-locked; a refresh reads only the rows whose
//! tracking column moved past the index's last update timestamp. Either way
//! the index is then handed to the stream controller at the live binlog
//! position before the lock is released.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};
use vecsync_binlog::RawRow;
use vecsync_core::{index_key, BinlogCoordinates, Options, VecsyncError, VectorIndex};

use super::catalog::{quote_identifier, resolve_ordinals, CatalogColumn, ColumnOrdinals};
use super::error::StreamError;
use super::source::BinlogConnection;

/// What a bulk load is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildAction {
    /// Load every row of the table
    Build,
    /// Load rows changed since the index's update timestamp
    Refresh,
}

/// Table and columns feeding one vector index.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Base table, id and vector columns
    pub column: CatalogColumn,
    /// Timestamp column bounding a refresh (`track` option)
    pub tracking_column: Option<String>,
}

impl BuildSpec {
    /// Spec for `database.table.column` from the column's `info` options.
    ///
    /// `idcol` is required; `track` names the optional tracking column.
    pub fn new(
        database: &str,
        table: &str,
        column: &str,
        options: &Options,
    ) -> vecsync_core::Result<Self> {
        let id_column = options
            .get("idcol")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                VecsyncError::InvalidOptions(format!(
                    "{} has no idcol",
                    index_key(database, table, column)
                ))
            })?;
        let tracking_column = options
            .get("track")
            .filter(|track| !track.is_empty())
            .map(str::to_string);
        Ok(Self {
            column: CatalogColumn {
                database: database.to_string(),
                table: table.to_string(),
                column: column.to_string(),
                options: options.clone(),
                id_column: id_column.to_string(),
            },
            tracking_column,
        })
    }

    /// Build spec for a catalogued column, with no tracking column.
    pub fn from_catalog(column: CatalogColumn) -> Self {
        Self {
            column,
            tracking_column: None,
        }
    }

    /// Use `column` as the tracking column.
    pub fn with_tracking_column(mut self, column: impl Into<String>) -> Self {
        self.tracking_column = Some(column.into());
        self
    }

    /// `db.table.column` name of the index
    pub fn index_key(&self) -> String {
        index_key(&self.column.database, &self.column.table, &self.column.column)
    }

    fn table_ref(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.column.database),
            quote_identifier(&self.column.table)
        )
    }

    /// Row query; bounded to `(since, until]` whenever a tracking column is set.
    fn select_sql(&self, since: u64, until: u64) -> String {
        let mut sql = format!(
            "SELECT {}, {} FROM {}",
            quote_identifier(&self.column.id_column),
            quote_identifier(&self.column.column),
            self.table_ref()
        );
        if let Some(track) = &self.tracking_column {
            let track = quote_identifier(track);
            sql.push_str(&format!(
                " WHERE unix_timestamp({track}) > {since} AND unix_timestamp({track}) <= {until}"
            ));
        }
        sql
    }
}

/// Outcome of a bulk build or refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Rows inserted into the index
    pub rows: usize,
    /// Rows skipped for a missing or non-numeric id, or an empty vector
    pub skipped: usize,
    /// Binlog position the index was stamped with, if streaming had one
    pub coords: Option<BinlogCoordinates>,
    /// Whether the table is now maintained from the binlog
    pub tracked: bool,
}

/// Rows read under the table lock.
pub(super) struct LoadedRows {
    pub rows: usize,
    pub skipped: usize,
    pub ordinals: ColumnOrdinals,
}

/// Isolation level, then a read lock on the base table.
pub(super) fn lock_table(
    conn: &mut dyn BinlogConnection,
    spec: &BuildSpec,
) -> Result<(), StreamError> {
    conn.query_raw("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")?;
    conn.query_raw(&format!("LOCK TABLES {} READ", spec.table_ref()))?;
    Ok(())
}

pub(super) fn unlock_tables(conn: &mut dyn BinlogConnection) -> Result<(), StreamError> {
    conn.query_raw("UNLOCK TABLES")?;
    Ok(())
}

/// Read the table's rows into `index` and resolve the column ordinals.
///
/// The index's update timestamp advances to now before the rows are read.
pub(super) fn load_rows(
    conn: &mut dyn BinlogConnection,
    spec: &BuildSpec,
    index: &dyn VectorIndex,
    action: BuildAction,
) -> Result<LoadedRows, StreamError> {
    let now = unix_now();
    let sql = spec.select_sql(index.update_ts(), now);
    index.set_update_ts(now);
    debug!(index = %spec.index_key(), ?action, %sql, "loading rows");

    let mut rows = 0;
    let mut skipped = 0;
    for row in conn.query_raw(&sql)? {
        match parse_row(row) {
            Some((row_id, vector)) => {
                index.insert_vector(&vector, 0, row_id)?;
                rows += 1;
            }
            None => skipped += 1,
        }
    }

    let ordinals = if index.supports_incr_updates() {
        resolve_ordinals(conn, &spec.column)?.ok_or_else(|| StreamError::BulkLoad {
            index: spec.index_key(),
            reason: format!(
                "column {} or {} not found",
                spec.column.id_column, spec.column.column
            ),
        })?
    } else {
        ColumnOrdinals { id: 0, vector: 0 }
    };

    Ok(LoadedRows {
        rows,
        skipped,
        ordinals,
    })
}

/// `(id, vector)` from a result row; the id arrives as decimal text.
fn parse_row(row: RawRow) -> Option<(u64, Vec<u8>)> {
    let mut fields = row.into_iter();
    let id = fields.next().flatten().filter(|id| !id.is_empty());
    let vector = fields.next().flatten().filter(|v| !v.is_empty());
    let (Some(id), Some(vector)) = (id, vector) else {
        trace!("skipping row without id or vector");
        return None;
    };
    let row_id = std::str::from_utf8(&id).ok()?.trim().parse().ok();
    if row_id.is_none() {
        trace!(id = %String::from_utf8_lossy(&id), "skipping row with non-numeric id");
    }
    row_id.map(|row_id| (row_id, vector))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

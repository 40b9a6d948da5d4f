//! Decoders for the three event kinds the pipeline consumes
//!
//! * table map: binds a numeric table id to `db.table` and its column types
//! * rows (write/update v2): row images packed back to back
//! * rotate: the next binlog file name and start position
//!
//! All decoders take the event from its header up to, but excluding, the
//! checksum trailer (see [`crate::event::strip_trailer`]) and never read
//! past the buffer; malformed input yields a [`DecodeError`].

use tracing::{debug, trace};

use crate::cursor::{ByteCursor, DecodeError};
use crate::event::{column_type, is_integer_type, metadata_width, EventType, EVENT_HEADER_LEN};

/// Bytes needed for 0..=9 leftover decimal digits.
const DIG2BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];
const DIGITS_PER_WORD: usize = 9;
const WORD_SIZE: usize = 4;
const MAX_FSP: u16 = 6;

/// Schema of one table as announced by a table map event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMap {
    /// Numeric id referenced by the following row events
    pub table_id: u64,
    /// Database name
    pub database: String,
    /// Table name
    pub table: String,
    /// Column type codes in table order
    pub column_types: Vec<u8>,
    /// Per-column metadata, 0 for types without any
    pub column_metadata: Vec<u16>,
}

impl TableMap {
    /// Number of columns
    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }
}

/// Decode a table map event.
///
/// `is_tracked(db, table)` is consulted right after the table name is read.
/// Untracked tables return `Ok(None)` without touching the column arrays.
pub fn decode_table_map<F>(event: &[u8], is_tracked: F) -> Result<Option<TableMap>, DecodeError>
where
    F: FnOnce(&str, &str) -> bool,
{
    let mut cur = ByteCursor::new(event);
    cur.skip(EVENT_HEADER_LEN, "event header")?;

    let table_id = cur.read_u48("table id")?;
    cur.skip(2, "table map flags")?;

    let db_len = usize::from(cur.read_u8("database name length")?);
    let database = utf8(cur.read_bytes(db_len, "database name")?, "database name")?;
    cur.skip(1, "database name terminator")?;

    let table_len = usize::from(cur.read_u8("table name length")?);
    let table = utf8(cur.read_bytes(table_len, "table name")?, "table name")?;

    if !is_tracked(database, table) {
        return Ok(None);
    }

    cur.skip(1, "table name terminator")?;

    let column_count = cur.read_lenenc_len("column count")?;
    let column_types = cur.read_bytes(column_count, "column types")?.to_vec();

    let metadata_len = cur.read_lenenc_len("metadata length")?;
    let mut meta = ByteCursor::new(cur.read_bytes(metadata_len, "column metadata")?);
    let column_metadata = column_types
        .iter()
        .map(|&col_type| match metadata_width(col_type) {
            1 => meta.read_u8("column metadata").map(u16::from),
            2 => meta.read_u16("column metadata"),
            _ => Ok(0),
        })
        .collect::<Result<Vec<u16>, DecodeError>>()?;

    Ok(Some(TableMap {
        table_id,
        database: database.to_string(),
        table: table.to_string(),
        column_types,
        column_metadata,
    }))
}

/// Which row event layout is being decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowsKind {
    /// `WRITE_ROWS_EVENT` v2: one image per row
    Write,
    /// `UPDATE_ROWS_EVENT` v2: before and after image per row
    Update,
}

impl RowsKind {
    /// Row kind for an event type, if it carries row images we consume.
    pub fn from_event_type(event_type: EventType) -> Option<Self> {
        match event_type {
            EventType::WriteRowsV2 => Some(RowsKind::Write),
            EventType::UpdateRowsV2 => Some(RowsKind::Update),
            _ => None,
        }
    }
}

/// The two captured columns of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRow {
    /// Id column value
    pub row_id: u64,
    /// Vector column bytes (length prefix stripped)
    pub vector: Vec<u8>,
}

/// Rows event flag marking the last event of a statement. Table ids bound
/// by the statement's table maps are released after it.
pub const STMT_END_F: u16 = 0x0001;

/// Leading fields of a rows event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowsHeader {
    /// Table id the rows belong to
    pub table_id: u64,
    /// Rows event flags
    pub flags: u16,
}

impl RowsHeader {
    /// Whether this event ends its statement
    pub fn is_statement_end(&self) -> bool {
        self.flags & STMT_END_F != 0
    }
}

/// Read the table id and flags of a rows event without decoding any row.
pub fn decode_rows_header(event: &[u8]) -> Result<RowsHeader, DecodeError> {
    let mut cur = ByteCursor::new(event);
    cur.skip(EVENT_HEADER_LEN, "event header")?;
    let table_id = cur.read_u48("table id")?;
    let flags = cur.read_u16("rows flags")?;
    Ok(RowsHeader { table_id, flags })
}

/// Decode every row image in a rows event against `map`.
///
/// Ordinals are 1-based. Rows whose id is NULL or not an integer, or whose
/// vector is NULL or empty, are dropped. For updates the vector comes from
/// the after image; the id does too unless a minimal row image left it out,
/// in which case the before image supplies it.
pub fn decode_rows(
    event: &[u8],
    kind: RowsKind,
    map: &TableMap,
    id_ordinal: u32,
    vector_ordinal: u32,
) -> Result<Vec<DecodedRow>, DecodeError> {
    let mut cur = ByteCursor::new(event);
    cur.skip(EVENT_HEADER_LEN, "event header")?;

    let table_id = cur.read_u48("table id")?;
    if table_id != map.table_id {
        return Err(DecodeError::SchemaMismatch(format!(
            "rows event for table id {table_id}, cached map is {}.{} ({})",
            map.database, map.table, map.table_id
        )));
    }
    cur.skip(2, "rows flags")?;

    let extra_len = usize::from(cur.read_u16("extra data length")?);
    let extra_payload = extra_len.checked_sub(2).ok_or_else(|| {
        DecodeError::InvalidLength(format!("extra data length {extra_len}"))
    })?;
    cur.skip(extra_payload, "extra data")?;

    let column_count = cur.read_lenenc_len("column count")?;
    if column_count != map.column_count() {
        return Err(DecodeError::SchemaMismatch(format!(
            "rows event has {column_count} columns, table map has {}",
            map.column_count()
        )));
    }

    let id_idx = ordinal_index(id_ordinal, column_count, "id")?;
    let vector_idx = ordinal_index(vector_ordinal, column_count, "vector")?;

    let bitmap_len = column_count.div_ceil(8);
    let before_present = cur.read_bytes(bitmap_len, "columns present bitmap")?;
    let after_present = match kind {
        RowsKind::Write => before_present,
        RowsKind::Update => cur.read_bytes(bitmap_len, "after image bitmap")?,
    };

    let capture = Capture {
        id_idx,
        vector_idx,
    };
    let mut rows = Vec::new();
    while !cur.is_empty() {
        let before_id = match kind {
            RowsKind::Update => read_image(&mut cur, map, before_present, Some(capture))?.0,
            RowsKind::Write => None,
        };
        let (after_id, vector) = read_image(&mut cur, map, after_present, Some(capture))?;
        let row_id = match (after_id, before_id) {
            (None, Some(id)) => {
                debug!(row_id = id, table = %map.table, "id missing from after image; using before image");
                Some(id)
            }
            (id, _) => id,
        };
        match (row_id, vector) {
            (Some(row_id), Some(vector)) if !vector.is_empty() => rows.push(DecodedRow {
                row_id,
                vector: vector.to_vec(),
            }),
            (row_id, _) => {
                trace!(?row_id, table = %map.table, "dropping row without id or vector");
            }
        }
    }

    Ok(rows)
}

/// A binlog rotation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rotation {
    /// Next binlog file
    pub file: String,
    /// Position to continue from in `file`
    pub position: u64,
}

/// Decode a rotate event; the file name runs to the end of `event`.
pub fn decode_rotate(event: &[u8]) -> Result<Rotation, DecodeError> {
    let mut cur = ByteCursor::new(event);
    cur.skip(EVENT_HEADER_LEN, "event header")?;
    let position = cur.read_u64("rotate position")?;
    let name = utf8(cur.read_rest(), "rotate file name")?;
    if name.is_empty() {
        return Err(DecodeError::InvalidLength("empty rotate file name".to_string()));
    }

    Ok(Rotation {
        file: name.to_string(),
        position,
    })
}

#[derive(Clone, Copy)]
struct Capture {
    id_idx: usize,
    vector_idx: usize,
}

type Image<'a> = (Option<u64>, Option<&'a [u8]>);

fn read_image<'a>(
    cur: &mut ByteCursor<'a>,
    map: &TableMap,
    present: &[u8],
    capture: Option<Capture>,
) -> Result<Image<'a>, DecodeError> {
    let column_count = map.column_count();
    let present_count = (0..column_count).filter(|&i| bit_set(present, i)).count();
    let null_bitmap = cur.read_bytes(present_count.div_ceil(8), "null bitmap")?;

    let mut row_id = None;
    let mut vector = None;
    let mut present_idx = 0;
    for col in 0..column_count {
        if !bit_set(present, col) {
            continue;
        }
        let is_null = bit_set(null_bitmap, present_idx);
        present_idx += 1;
        if is_null {
            continue;
        }

        let col_type = map.column_types[col];
        let value = read_value(cur, col_type, map.column_metadata[col])?;
        if let Some(capture) = capture {
            if col == capture.id_idx && is_integer_type(col_type) {
                row_id = Some(ByteCursor::new(value).read_uint(value.len(), "id column")?);
            }
            if col == capture.vector_idx {
                vector = Some(value);
            }
        }
    }

    Ok((row_id, vector))
}

/// Read one column value, returning its payload without any length prefix.
fn read_value<'a>(
    cur: &mut ByteCursor<'a>,
    col_type: u8,
    meta: u16,
) -> Result<&'a [u8], DecodeError> {
    use column_type::*;

    let low = (meta & 0xFF) as u8;
    let high = (meta >> 8) as u8;
    match col_type {
        NULL => Ok(&[]),
        TINY | YEAR => cur.read_bytes(1, "column value"),
        SHORT => cur.read_bytes(2, "column value"),
        INT24 | DATE | NEWDATE | TIME => cur.read_bytes(3, "column value"),
        LONG | FLOAT | TIMESTAMP => cur.read_bytes(4, "column value"),
        LONGLONG | DOUBLE | DATETIME => cur.read_bytes(8, "column value"),
        TIME2 => cur.read_bytes(3 + fractional_bytes(meta)?, "column value"),
        DATETIME2 => cur.read_bytes(5 + fractional_bytes(meta)?, "column value"),
        TIMESTAMP2 => cur.read_bytes(4 + fractional_bytes(meta)?, "column value"),
        VARCHAR | VAR_STRING => read_prefixed(cur, if meta < 256 { 1 } else { 2 }),
        STRING => {
            let real_type = low | 0x30;
            if real_type == ENUM || real_type == SET {
                cur.read_bytes(usize::from(high), "column value")
            } else {
                let max_len = ((u16::from(low & 0x30) ^ 0x30) << 4) | u16::from(high);
                read_prefixed(cur, if max_len < 256 { 1 } else { 2 })
            }
        }
        BLOB | JSON | GEOMETRY | VECTOR => {
            let prefix = usize::from(meta);
            if !(1..=4).contains(&prefix) {
                return Err(DecodeError::InvalidLength(format!(
                    "blob length prefix of {prefix} bytes"
                )));
            }
            read_prefixed(cur, prefix)
        }
        BIT => {
            let bits = usize::from(high) * 8 + usize::from(low);
            cur.read_bytes(bits.div_ceil(8), "column value")
        }
        NEWDECIMAL => cur.read_bytes(decimal_width(low, high)?, "column value"),
        ENUM | SET => {
            let width = if high != 0 { high } else { low };
            cur.read_bytes(usize::from(width), "column value")
        }
        other => Err(DecodeError::UnsupportedColumnType(other)),
    }
}

fn read_prefixed<'a>(cur: &mut ByteCursor<'a>, prefix: usize) -> Result<&'a [u8], DecodeError> {
    let len = cur.read_uint(prefix, "value length")?;
    let len = usize::try_from(len)
        .map_err(|_| DecodeError::InvalidLength(format!("value length {len}")))?;
    cur.read_bytes(len, "column value")
}

fn fractional_bytes(fsp: u16) -> Result<usize, DecodeError> {
    if fsp > MAX_FSP {
        return Err(DecodeError::InvalidLength(format!(
            "fractional seconds precision {fsp}"
        )));
    }
    Ok((usize::from(fsp) + 1) / 2)
}

fn decimal_width(precision: u8, scale: u8) -> Result<usize, DecodeError> {
    let precision = usize::from(precision);
    let scale = usize::from(scale);
    if scale > precision {
        return Err(DecodeError::InvalidLength(format!(
            "decimal scale {scale} exceeds precision {precision}"
        )));
    }
    let integral = precision - scale;
    Ok((integral / DIGITS_PER_WORD) * WORD_SIZE
        + DIG2BYTES[integral % DIGITS_PER_WORD]
        + (scale / DIGITS_PER_WORD) * WORD_SIZE
        + DIG2BYTES[scale % DIGITS_PER_WORD])
}

fn ordinal_index(ordinal: u32, column_count: usize, which: &str) -> Result<usize, DecodeError> {
    let idx = usize::try_from(ordinal)
        .ok()
        .and_then(|o| o.checked_sub(1))
        .filter(|&idx| idx < column_count);
    idx.ok_or_else(|| {
        DecodeError::SchemaMismatch(format!(
            "{which} column ordinal {ordinal} outside 1..={column_count}"
        ))
    })
}

fn bit_set(bitmap: &[u8], idx: usize) -> bool {
    bitmap
        .get(idx / 8)
        .map(|byte| byte & (1 << (idx % 8)) != 0)
        .unwrap_or(false)
}

fn utf8<'a>(bytes: &'a [u8], context: &'static str) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(bytes).map_err(|_| DecodeError::Utf8(context))
}

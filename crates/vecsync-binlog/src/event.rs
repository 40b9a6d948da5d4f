//! Binlog event framing: common header, event and column type codes, the
//! checksum trailer and the format description that announces it.

use crate::cursor::{ByteCursor, DecodeError};

/// Size of the common event header.
pub const EVENT_HEADER_LEN: usize = 19;

/// Size of the CRC32 trailer on checksummed events.
pub const CHECKSUM_LEN: usize = 4;

const ROTATE_EVENT: u8 = 4;
const FORMAT_DESCRIPTION_EVENT: u8 = 15;
const TABLE_MAP_EVENT: u8 = 19;
const WRITE_ROWS_EVENT_V2: u8 = 30;
const UPDATE_ROWS_EVENT_V2: u8 = 31;

/// Event kinds the pipeline acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Switch to a new binlog file
    Rotate,
    /// Start of a binlog file; announces the checksum algorithm
    FormatDescription,
    /// Table id to schema mapping
    TableMap,
    /// Inserted rows
    WriteRowsV2,
    /// Updated rows (before and after images)
    UpdateRowsV2,
    /// Anything else; skipped
    Other(u8),
}

impl From<u8> for EventType {
    fn from(code: u8) -> Self {
        match code {
            ROTATE_EVENT => EventType::Rotate,
            FORMAT_DESCRIPTION_EVENT => EventType::FormatDescription,
            TABLE_MAP_EVENT => EventType::TableMap,
            WRITE_ROWS_EVENT_V2 => EventType::WriteRowsV2,
            UPDATE_ROWS_EVENT_V2 => EventType::UpdateRowsV2,
            other => EventType::Other(other),
        }
    }
}

/// MySQL column type codes as they appear in table map events.
pub mod column_type {
    #![allow(missing_docs)]

    pub const DECIMAL: u8 = 0;
    pub const TINY: u8 = 1;
    pub const SHORT: u8 = 2;
    pub const LONG: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const NULL: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const LONGLONG: u8 = 8;
    pub const INT24: u8 = 9;
    pub const DATE: u8 = 10;
    pub const TIME: u8 = 11;
    pub const DATETIME: u8 = 12;
    pub const YEAR: u8 = 13;
    pub const NEWDATE: u8 = 14;
    pub const VARCHAR: u8 = 15;
    pub const BIT: u8 = 16;
    pub const TIMESTAMP2: u8 = 17;
    pub const DATETIME2: u8 = 18;
    pub const TIME2: u8 = 19;
    pub const VECTOR: u8 = 242;
    pub const JSON: u8 = 245;
    pub const NEWDECIMAL: u8 = 246;
    pub const ENUM: u8 = 247;
    pub const SET: u8 = 248;
    pub const BLOB: u8 = 252;
    pub const VAR_STRING: u8 = 253;
    pub const STRING: u8 = 254;
    pub const GEOMETRY: u8 = 255;
}

/// Bytes of table-map metadata carried by a column of type `col_type`.
///
/// Getting this wrong desynchronises every later column in the event.
pub fn metadata_width(col_type: u8) -> usize {
    use column_type::*;
    match col_type {
        FLOAT | DOUBLE | BLOB | JSON | GEOMETRY | VECTOR | TIME2 | DATETIME2 | TIMESTAMP2 => 1,
        BIT | VARCHAR | NEWDECIMAL | SET | ENUM | STRING => 2,
        _ => 0,
    }
}

/// Whether `col_type` is an integer type usable as a row id.
pub fn is_integer_type(col_type: u8) -> bool {
    use column_type::*;
    matches!(col_type, TINY | SHORT | INT24 | LONG | LONGLONG)
}

/// Common 19-byte event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Seconds since the epoch
    pub timestamp: u32,
    /// Raw event type code
    pub type_code: u8,
    /// Originating server id
    pub server_id: u32,
    /// Total event size including header and trailer
    pub event_size: u32,
    /// Position of the next event in the binlog file (0 for artificial events)
    pub log_pos: u32,
    /// Event flags
    pub flags: u16,
}

impl EventHeader {
    /// Parse the header at the start of `event`.
    pub fn parse(event: &[u8]) -> Result<Self, DecodeError> {
        let mut cur = ByteCursor::new(event);
        Ok(Self {
            timestamp: cur.read_u32("event header")?,
            type_code: cur.read_u8("event header")?,
            server_id: cur.read_u32("event header")?,
            event_size: cur.read_u32("event header")?,
            log_pos: cur.read_u32("event header")?,
            flags: cur.read_u16("event header")?,
        })
    }

    /// Classified event type
    pub fn event_type(&self) -> EventType {
        EventType::from(self.type_code)
    }
}

/// Checksum algorithm of the events following a format description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumAlg {
    /// `binlog_checksum=NONE`: events carry no trailer
    Off,
    /// CRC32 trailer on every event
    #[default]
    Crc32,
}

impl ChecksumAlg {
    /// Trailer bytes at the end of each event
    pub fn trailer_len(self) -> usize {
        match self {
            ChecksumAlg::Off => 0,
            ChecksumAlg::Crc32 => CHECKSUM_LEN,
        }
    }
}

/// Binlog format version, server version, create timestamp, header length.
const FDE_FIXED_LEN: usize = 2 + SERVER_VERSION_LEN + 4 + 1;
const SERVER_VERSION_LEN: usize = 50;
/// First server release whose format descriptions carry the algorithm byte.
const CHECKSUM_SINCE: (u32, u32, u32) = (5, 6, 1);

/// Read the checksum algorithm from a format description event.
///
/// The algorithm byte sits just before the event's own CRC32, which a
/// format description carries even when the algorithm is `Off`.
pub fn decode_format_description(event: &[u8]) -> Result<ChecksumAlg, DecodeError> {
    let mut cur = ByteCursor::new(event);
    cur.skip(EVENT_HEADER_LEN, "event header")?;
    cur.skip(2, "binlog format version")?;
    let version = cur.read_bytes(SERVER_VERSION_LEN, "server version")?;
    if server_version(version) < CHECKSUM_SINCE {
        return Ok(ChecksumAlg::Off);
    }

    let alg_offset = event
        .len()
        .checked_sub(CHECKSUM_LEN + 1)
        .filter(|&offset| offset >= EVENT_HEADER_LEN + FDE_FIXED_LEN)
        .ok_or(DecodeError::Truncated {
            context: "format description checksum algorithm",
            needed: EVENT_HEADER_LEN + FDE_FIXED_LEN + 1 + CHECKSUM_LEN,
            remaining: event.len(),
            offset: 0,
        })?;
    match event[alg_offset] {
        0 => Ok(ChecksumAlg::Off),
        1 => Ok(ChecksumAlg::Crc32),
        other => Err(DecodeError::UnsupportedChecksum(other)),
    }
}

/// `major.minor.patch` from a NUL-padded version string like `8.0.36-log`.
fn server_version(raw: &[u8]) -> (u32, u32, u32) {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text = String::from_utf8_lossy(&raw[..end]);
    let mut parts = text
        .split(|c: char| !c.is_ascii_digit())
        .map(|part| part.parse().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

/// `event` without its checksum trailer.
pub fn strip_trailer(event: &[u8], alg: ChecksumAlg) -> Result<&[u8], DecodeError> {
    let trailer = alg.trailer_len();
    event
        .len()
        .checked_sub(trailer)
        .filter(|&len| len >= EVENT_HEADER_LEN)
        .map(|len| &event[..len])
        .ok_or(DecodeError::Truncated {
            context: "event trailer",
            needed: EVENT_HEADER_LEN + trailer,
            remaining: event.len(),
            offset: 0,
        })
}

/// Check the CRC32 trailer of `event`.
pub fn verify_checksum(event: &[u8]) -> Result<(), DecodeError> {
    let body_len = event
        .len()
        .checked_sub(CHECKSUM_LEN)
        .filter(|len| *len >= EVENT_HEADER_LEN)
        .ok_or(DecodeError::Truncated {
            context: "checksummed event",
            needed: EVENT_HEADER_LEN + CHECKSUM_LEN,
            remaining: event.len(),
            offset: 0,
        })?;

    let (body, trailer) = event.split_at(body_len);
    let expected = ByteCursor::new(trailer).read_u32("checksum")?;
    let computed = crc32fast::hash(body);
    if expected != computed {
        return Err(DecodeError::ChecksumMismatch { expected, computed });
    }
    Ok(())
}

/// Whether `event` ends in a valid CRC32 trailer.
pub fn has_valid_checksum(event: &[u8]) -> bool {
    verify_checksum(event).is_ok()
}

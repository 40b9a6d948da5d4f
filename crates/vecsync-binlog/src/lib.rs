//! # vecsync-binlog
//!
//! MySQL binary log decoding and a replication client built on the `mysql`
//! driver.
//!
//! The decoders understand exactly the events needed to keep vector indexes
//! in sync: format descriptions, table maps, write/update row events (v2)
//! and rotations. Every
//! read is bounds checked; malformed events produce a [`DecodeError`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod cursor;
pub mod decoder;
pub mod event;

pub use cursor::{ByteCursor, DecodeError};
pub use decoder::{
    decode_rotate, decode_rows, decode_rows_header, decode_table_map, DecodedRow, Rotation,
    RowsHeader, RowsKind, TableMap, STMT_END_F,
};
pub use event::{
    decode_format_description, has_valid_checksum, strip_trailer, verify_checksum, ChecksumAlg,
    EventHeader, EventType, CHECKSUM_LEN, EVENT_HEADER_LEN,
};
pub use client::{text_row, ConnectOptions, MySqlConn, RawRow, Row, WireError};

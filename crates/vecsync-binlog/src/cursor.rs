//! Bounds-checked little-endian reader
//!
//! Every length in a binlog event or protocol packet is untrusted input. All
//! reads go through [`ByteCursor`], which checks the remaining length first
//! and reports [`DecodeError::Truncated`] instead of reading out of bounds.

use bytes::Buf;
use thiserror::Error;

/// Errors produced while decoding binary input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A read needed more bytes than remain.
    #[error("truncated {context}: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    Truncated {
        /// What was being read
        context: &'static str,
        /// Bytes the read needed
        needed: usize,
        /// Bytes left in the buffer
        remaining: usize,
        /// Offset of the failed read
        offset: usize,
    },

    /// A length or count field holds an impossible value.
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// A column type with no known value encoding.
    #[error("unsupported column type {0}")]
    UnsupportedColumnType(u8),

    /// A row event does not match the cached table map.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The CRC32 trailer does not match the event body.
    #[error("checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Trailer value
        expected: u32,
        /// Checksum of the event body
        computed: u32,
    },

    /// A format description announces an unknown checksum algorithm.
    #[error("unsupported binlog checksum algorithm {0}")]
    UnsupportedChecksum(u8),

    /// A name field is not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
}

/// Cursor over a byte slice with checked reads.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Whether every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unconsumed bytes, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    /// Restrict the cursor to the next `len` bytes, dropping anything after.
    pub fn limit(&mut self, len: usize, context: &'static str) -> Result<(), DecodeError> {
        self.ensure(len, context)?;
        self.buf = &self.buf[..len];
        Ok(())
    }

    fn ensure(&self, needed: usize, context: &'static str) -> Result<(), DecodeError> {
        if self.buf.remaining() < needed {
            return Err(DecodeError::Truncated {
                context,
                needed,
                remaining: self.buf.remaining(),
                offset: self.offset,
            });
        }
        Ok(())
    }

    /// Read one byte.
    pub fn read_u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        self.ensure(1, context)?;
        self.offset += 1;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian u16.
    pub fn read_u16(&mut self, context: &'static str) -> Result<u16, DecodeError> {
        self.ensure(2, context)?;
        self.offset += 2;
        Ok(self.buf.get_u16_le())
    }

    /// Read a little-endian 3-byte integer.
    pub fn read_u24(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        self.read_uint(3, context).map(|v| v as u32)
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        self.ensure(4, context)?;
        self.offset += 4;
        Ok(self.buf.get_u32_le())
    }

    /// Read a little-endian 6-byte integer.
    pub fn read_u48(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        self.read_uint(6, context)
    }

    /// Read a little-endian u64.
    pub fn read_u64(&mut self, context: &'static str) -> Result<u64, DecodeError> {
        self.ensure(8, context)?;
        self.offset += 8;
        Ok(self.buf.get_u64_le())
    }

    /// Read an unsigned little-endian integer of `width` bytes (1..=8).
    pub fn read_uint(&mut self, width: usize, context: &'static str) -> Result<u64, DecodeError> {
        if width == 0 || width > 8 {
            return Err(DecodeError::InvalidLength(format!(
                "{context}: integer width {width}"
            )));
        }
        self.ensure(width, context)?;
        self.offset += width;
        Ok(self.buf.get_uint_le(width))
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        self.ensure(len, context)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(len);
        self.buf = tail;
        self.offset += len;
        Ok(head)
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize, context: &'static str) -> Result<(), DecodeError> {
        self.read_bytes(len, context).map(|_| ())
    }

    /// Consume everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest: &'a [u8] = self.buf;
        self.offset += rest.len();
        self.buf = &[];
        rest
    }

    /// Read bytes up to (not including) a NUL terminator, consuming the NUL.
    ///
    /// Missing terminator consumes the rest of the buffer.
    pub fn read_null_terminated(&mut self) -> &'a [u8] {
        let buf: &'a [u8] = self.buf;
        match buf.iter().position(|&b| b == 0) {
            Some(end) => {
                let value = &buf[..end];
                self.buf = &buf[end + 1..];
                self.offset += end + 1;
                value
            }
            None => self.read_rest(),
        }
    }

    /// Read a length-encoded integer.
    ///
    /// Returns `None` for the `0xFB` NULL marker.
    pub fn read_lenenc_int(&mut self, context: &'static str) -> Result<Option<u64>, DecodeError> {
        match self.read_u8(context)? {
            0xFB => Ok(None),
            0xFC => self.read_uint(2, context).map(Some),
            0xFD => self.read_uint(3, context).map(Some),
            0xFE => self.read_u64(context).map(Some),
            0xFF => Err(DecodeError::InvalidLength(format!(
                "{context}: 0xff length-encoded integer"
            ))),
            v => Ok(Some(u64::from(v))),
        }
    }

    /// Read a length-encoded integer that must not be NULL, as a usize.
    pub fn read_lenenc_len(&mut self, context: &'static str) -> Result<usize, DecodeError> {
        let value = self
            .read_lenenc_int(context)?
            .ok_or_else(|| DecodeError::InvalidLength(format!("{context}: unexpected NULL")))?;
        usize::try_from(value)
            .map_err(|_| DecodeError::InvalidLength(format!("{context}: {value}")))
    }

    /// Read a length-encoded byte string; `None` for NULL.
    pub fn read_lenenc_bytes(
        &mut self,
        context: &'static str,
    ) -> Result<Option<&'a [u8]>, DecodeError> {
        match self.read_lenenc_int(context)? {
            None => Ok(None),
            Some(len) => {
                let len = usize::try_from(len)
                    .map_err(|_| DecodeError::InvalidLength(format!("{context}: {len}")))?;
                self.read_bytes(len, context).map(Some)
            }
        }
    }
}

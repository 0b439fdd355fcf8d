//! Byte transport used by every encoder in the workspace.
//!
//! Encoders never touch a concrete buffer: they are written against
//! [`WireWriter`] and [`WireReader`], so a host can plug in its own packet
//! writer. [`ByteWriter`] and [`ByteReader`] are the in-memory implementations
//! backed by the `bytes` crate.
//!
//! ## Encoding
//!
//! - fixed-width words (`u32`, `u64`, floats) are little endian
//! - `varint` is unsigned LEB128, at most 10 bytes
//! - signed varints are zigzag-mapped first
//! - strings and byte runs are a varint length followed by the raw bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Longest LEB128 encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

/// Errors produced while reading from a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("varint is longer than 10 bytes or overflows u64")]
    VarintOverflow,

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: u64 },

    #[error("declared length {len} exceeds the {max} bytes available")]
    LengthTooLarge { len: u64, max: usize },
}

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Write half of the transport.
pub trait WireWriter {
    fn write_u8(&mut self, value: u8);

    fn write_u32(&mut self, value: u32);

    fn write_u64(&mut self, value: u64);

    fn write_bytes(&mut self, bytes: &[u8]);

    fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.write_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.write_u8(value as u8);
    }

    fn write_signed_varint(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    fn write_str(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }
}

/// Read half of the transport.
pub trait WireReader {
    fn read_u8(&mut self) -> Result<u8, WireError>;

    fn read_u32(&mut self) -> Result<u32, WireError>;

    fn read_u64(&mut self) -> Result<u64, WireError>;

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError>;

    /// Bytes left to read.
    fn remaining(&self) -> usize;

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(WireError::InvalidTag {
                what: "bool",
                tag: u64::from(tag),
            }),
        }
    }

    fn read_varint(&mut self) -> Result<u64, WireError> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8()?;
            let low = u64::from(byte & 0x7f);
            // The tenth byte may only contribute the top bit of a u64.
            if i == MAX_VARINT_LEN - 1 && low > 1 {
                return Err(WireError::VarintOverflow);
            }
            value |= low << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow)
    }

    fn read_signed_varint(&mut self) -> Result<i64, WireError> {
        Ok(zigzag_decode(self.read_varint()?))
    }

    fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a varint length and check it against what is left in the input.
    fn read_len(&mut self) -> Result<usize, WireError> {
        let len = self.read_varint()?;
        let max = self.remaining();
        if len > max as u64 {
            return Err(WireError::LengthTooLarge { len, max });
        }
        Ok(len as usize)
    }

    fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)
    }
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory transport
// ─────────────────────────────────────────────────────────────────────────────

/// Growable in-memory writer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: BytesMut,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finish writing and hand out the frozen payload.
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }

    /// Finish writing and open a reader over the payload.
    pub fn into_reader(self) -> ByteReader {
        ByteReader::new(self.freeze())
    }
}

impl WireWriter for ByteWriter {
    fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct ByteReader {
    buf: Bytes,
}

impl ByteReader {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            buf: payload.into(),
        }
    }

    fn ensure(&self, needed: usize) -> Result<(), WireError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(WireError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }
}

impl WireReader for ByteReader {
    fn read_u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn read_u32(&mut self) -> Result<u32, WireError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn read_u64(&mut self) -> Result<u64, WireError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, WireError> {
        self.ensure(len)?;
        Ok(self.buf.copy_to_bytes(len).to_vec())
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        let values = [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX];
        let mut writer = ByteWriter::new();
        for v in values {
            writer.write_varint(v);
        }
        let mut reader = writer.into_reader();
        for v in values {
            assert_eq!(reader.read_varint().unwrap(), v);
        }
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_small_varints_use_one_byte() {
        let mut writer = ByteWriter::new();
        writer.write_varint(127);
        assert_eq!(writer.len(), 1);
        writer.write_varint(128);
        assert_eq!(writer.len(), 3);
    }

    #[test]
    fn test_signed_varint_zigzag() {
        let mut writer = ByteWriter::new();
        writer.write_signed_varint(-1);
        // zigzag(-1) == 1, a single byte
        assert_eq!(writer.as_slice(), &[1]);
        writer.write_signed_varint(i64::MIN);
        writer.write_signed_varint(i64::MAX);

        let mut reader = writer.into_reader();
        assert_eq!(reader.read_signed_varint().unwrap(), -1);
        assert_eq!(reader.read_signed_varint().unwrap(), i64::MIN);
        assert_eq!(reader.read_signed_varint().unwrap(), i64::MAX);
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let mut reader = ByteReader::new(vec![0xff; 11]);
        assert_eq!(reader.read_varint(), Err(WireError::VarintOverflow));
    }

    #[test]
    fn test_truncated_input() {
        let mut reader = ByteReader::new(vec![1, 2]);
        assert_eq!(
            reader.read_u32(),
            Err(WireError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_string_length_checked_before_alloc() {
        let mut writer = ByteWriter::new();
        writer.write_varint(1_000_000);
        writer.write_bytes(b"abc");
        let mut reader = writer.into_reader();
        assert!(matches!(
            reader.read_str(),
            Err(WireError::LengthTooLarge { len: 1_000_000, max: 3 })
        ));
    }

    #[test]
    fn test_bool_tag_validation() {
        let mut reader = ByteReader::new(vec![2]);
        assert!(matches!(
            reader.read_bool(),
            Err(WireError::InvalidTag { what: "bool", tag: 2 })
        ));
    }

    #[test]
    fn test_mixed_payload() {
        let mut writer = ByteWriter::new();
        writer.write_bool(true);
        writer.write_str("héllo");
        writer.write_f32(1.5);
        writer.write_f64(-0.25);
        writer.write_u64(42);

        let mut reader = writer.into_reader();
        assert!(reader.read_bool().unwrap());
        assert_eq!(reader.read_str().unwrap(), "héllo");
        assert_eq!(reader.read_f32().unwrap(), 1.5);
        assert_eq!(reader.read_f64().unwrap(), -0.25);
        assert_eq!(reader.read_u64().unwrap(), 42);
    }
}

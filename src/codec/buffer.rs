//! Growable write buffer and bounds-checked reader for the binary layouts.

use crate::error::CodecError;

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_32: u32 = 1 << 31;

/// Maps a signed integer onto an unsigned one with the same ordering.
///
/// Flipping the sign bit moves negative values below positive ones, so the
/// big-endian bytes of the result compare exactly like the signed inputs.
#[inline]
pub fn sortable_i64(value: i64) -> u64 {
    (value as u64) ^ SIGN_BIT_64
}

/// Inverse of [`sortable_i64`].
#[inline]
pub fn unsortable_i64(value: u64) -> i64 {
    (value ^ SIGN_BIT_64) as i64
}

/// 32-bit counterpart of [`sortable_i64`].
#[inline]
pub fn sortable_i32(value: i32) -> u32 {
    (value as u32) ^ SIGN_BIT_32
}

/// Inverse of [`sortable_i32`].
#[inline]
pub fn unsortable_i32(value: u32) -> i32 {
    (value ^ SIGN_BIT_32) as i32
}

/// Reusable byte buffer used to assemble keys and values.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    bytes: Vec<u8>,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Copies the contents into a fresh vector, leaving the buffer intact.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    pub fn put_u8(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_u64(value.to_bits());
    }

    /// Writes `value` as 8 order-preserving big-endian bytes.
    pub fn put_sortable_i64(&mut self, value: i64) {
        self.put_u64(sortable_i64(value));
    }

    /// Writes `value` as 4 order-preserving big-endian bytes.
    pub fn put_sortable_i32(&mut self, value: i32) {
        self.bytes
            .extend_from_slice(&sortable_i32(value).to_be_bytes());
    }

    /// Writes an unsigned LEB128 varint.
    pub fn put_varint(&mut self, value: u64) {
        let mut n = value;
        while n >= 0x80 {
            self.bytes.push((n as u8) | 0x80);
            n >>= 7;
        }
        self.bytes.push(n as u8);
    }
}

/// Cursor over an encoded byte slice.
///
/// Every read checks the remaining length first and fails with
/// [`CodecError::UnexpectedEof`] instead of panicking.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes and returns everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_sortable_i64(&mut self) -> Result<i64, CodecError> {
        Ok(unsortable_i64(self.read_u64()?))
    }

    pub fn read_sortable_i32(&mut self) -> Result<i32, CodecError> {
        Ok(unsortable_i32(u32::from_be_bytes(self.read_array()?)))
    }

    /// Consumes one byte and checks that it equals `expected`.
    pub fn expect_u8(&mut self, expected: u8, context: &str) -> Result<(), CodecError> {
        let found = self.read_u8()?;
        if found != expected {
            return Err(CodecError::InvalidKey(format!(
                "expected 0x{expected:02x} {context}, found 0x{found:02x}"
            )));
        }
        Ok(())
    }

    /// Returns the bytes before the next `delimiter` and consumes the delimiter.
    ///
    /// `None` if the delimiter does not occur in the rest of the input; nothing is
    /// consumed in that case.
    pub fn read_until(&mut self, delimiter: u8) -> Option<&'a [u8]> {
        let rest = &self.bytes[self.pos..];
        let idx = rest.iter().position(|&b| b == delimiter)?;
        self.pos += idx + 1;
        Some(&rest[..idx])
    }

    /// Reads an unsigned LEB128 varint.
    pub fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut result: u64 = 0;
        let mut shift: u32 = 0;

        loop {
            if shift >= 64 {
                return Err(CodecError::InvalidValue("varint overflow".to_string()));
            }

            let byte = self.read_u8()?;
            result |= u64::from(byte & 0x7F) << shift;

            if byte & 0x80 == 0 {
                return Ok(result);
            }

            shift += 7;
        }
    }
}

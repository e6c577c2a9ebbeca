//! Variable-length integer encoding utilities.
//!
//! Values are written in 7-bit groups, least significant group first, with
//! the high bit of each byte set when more bytes follow.

use crate::error::{QuireError, Result};

/// Maximum encoded length of a u64.
pub const MAX_VARINT_LEN: usize = 10;

/// Encode a u64 value using variable-length encoding.
pub fn encode_u64(value: u64) -> Vec<u8> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = encode_into(value, &mut buf);
    buf[..n].to_vec()
}

/// Encode into a caller-provided buffer, returning the number of bytes used.
pub fn encode_into(value: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut val = value;
    let mut i = 0;
    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;
        if val != 0 {
            byte |= 0x80;
        }
        buf[i] = byte;
        i += 1;
        if val == 0 {
            return i;
        }
    }
}

/// Append a varint to a byte vector.
pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let n = encode_into(value, &mut buf);
    out.extend_from_slice(&buf[..n]);
}

/// Decode a u64 value from variable-length encoding.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(QuireError::corruption("varint overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(QuireError::corruption("incomplete varint"))
}

/// Map signed values onto unsigned so small magnitudes stay short.
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Sequential varint decoder over a byte slice.
#[derive(Debug, Clone)]
pub struct VarintCursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> VarintCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        VarintCursor { bytes, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    /// Move to an absolute offset within the buffer.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        if offset > self.bytes.len() {
            return Err(QuireError::corruption(format!(
                "seek to {offset} past end of {}-byte buffer",
                self.bytes.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let (value, n) = decode_u64(&self.bytes[self.offset..])?;
        self.offset += n;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.read_u64()?;
        u32::try_from(value)
            .map_err(|_| QuireError::corruption(format!("varint {value} exceeds 32 bits")))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| QuireError::corruption("byte run past end of buffer"))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }
}

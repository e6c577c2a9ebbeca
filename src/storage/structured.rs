//! Typed binary reading and writing on top of storage streams.
//!
//! Fixed-width integers are little-endian. Variable-length integers use
//! 7-bit groups with a continuation bit (LEB128). Every byte written through
//! a [`StructWriter`] is folded into a running CRC32 so metadata files can end
//! with a verifiable footer.

use std::io::SeekFrom;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{QuireError, Result};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint;

/// Magic number preceding the checksum footer.
pub const FOOTER_MAGIC: u32 = 0xC0_28_93_E8;

/// Size in bytes of a checksum footer.
pub const FOOTER_LENGTH: u64 = 8;

/// Structured writer over a [`StorageOutput`].
#[derive(Debug)]
pub struct StructWriter<W: StorageOutput> {
    writer: W,
    hasher: crc32fast::Hasher,
}

impl<W: StorageOutput> StructWriter<W> {
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
        }
    }

    /// Current file pointer.
    pub fn position(&self) -> u64 {
        self.writer.position()
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        (&mut buf[..]).write_u32::<LittleEndian>(value)?;
        self.write_bytes(&buf)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        (&mut buf[..]).write_u64::<LittleEndian>(value)?;
        self.write_bytes(&buf)
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_u64(value as u64)
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    /// Write an unsigned variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let n = varint::encode_into(value, &mut buf);
        self.write_bytes(&buf[..n])
    }

    /// Write a signed variable-length integer using zig-zag encoding.
    pub fn write_zigzag(&mut self, value: i64) -> Result<()> {
        self.write_varint(varint::zigzag_encode(value))
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes)?;
        self.hasher.update(bytes);
        Ok(())
    }

    /// Write a length-prefixed byte sequence.
    pub fn write_len_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_varint(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_len_bytes(value.as_bytes())
    }

    /// Write a codec header: magic number followed by a format version.
    pub fn write_header(&mut self, magic: u32, version: u32) -> Result<()> {
        self.write_u32(magic)?;
        self.write_u32(version)
    }

    /// Write the checksum footer covering every byte written so far.
    pub fn write_footer(&mut self) -> Result<()> {
        let checksum = self.hasher.clone().finalize();
        self.write_u32(FOOTER_MAGIC)?;
        self.write_u32(checksum)
    }

    /// Flush and close the underlying stream.
    pub fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Structured reader over a [`StorageInput`].
#[derive(Debug)]
pub struct StructReader<R: StorageInput> {
    reader: R,
    position: u64,
    size: u64,
}

impl<R: StorageInput> StructReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        let mut reader = reader;
        let size = reader.size()?;
        let position = reader.stream_position()?;
        Ok(StructReader {
            reader,
            position,
            size,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes left before the end of the input.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.position)
    }

    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.size {
            return Err(QuireError::corruption(format!(
                "seek to {position} past end of input ({} bytes)",
                self.size
            )));
        }
        self.reader.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8().map_err(eof_as_corruption)?;
        self.position += 1;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(eof_as_corruption)?;
        self.position += 4;
        Ok(value)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self
            .reader
            .read_u64::<LittleEndian>()
            .map_err(eof_as_corruption)?;
        self.position += 8;
        Ok(value)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= 64 {
                return Err(QuireError::corruption("varint overflow"));
            }
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Read a varint that must fit in 32 bits.
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let value = self.read_varint()?;
        u32::try_from(value)
            .map_err(|_| QuireError::corruption(format!("varint {value} exceeds 32 bits")))
    }

    pub fn read_zigzag(&mut self) -> Result<i64> {
        Ok(varint::zigzag_decode(self.read_varint()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.remaining() {
            return Err(QuireError::corruption(format!(
                "read of {len} bytes past end of input"
            )));
        }
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).map_err(eof_as_corruption)?;
        self.position += len as u64;
        Ok(buf)
    }

    pub fn read_len_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_len_bytes()?;
        String::from_utf8(bytes).map_err(|e| QuireError::corruption(format!("invalid UTF-8: {e}")))
    }

    /// Read and validate a codec header, returning the stored version.
    pub fn check_header(&mut self, magic: u32, min_version: u32, max_version: u32) -> Result<u32> {
        let actual = self.read_u32()?;
        if actual != magic {
            return Err(QuireError::corruption(format!(
                "bad magic {actual:#010x}, expected {magic:#010x}"
            )));
        }
        let version = self.read_u32()?;
        if version < min_version || version > max_version {
            return Err(QuireError::corruption(format!(
                "unsupported format version {version} (supported {min_version}..={max_version})"
            )));
        }
        Ok(version)
    }

    /// Verify the checksum footer at the end of the input.
    ///
    /// Reads the whole file from the start; the read position is left just
    /// past the footer.
    pub fn check_footer(&mut self) -> Result<()> {
        if self.size < FOOTER_LENGTH {
            return Err(QuireError::corruption("file too short for checksum footer"));
        }
        let body_len = self.size - FOOTER_LENGTH;
        self.seek(0)?;
        let body = self.read_bytes(body_len as usize)?;
        let magic = self.read_u32()?;
        if magic != FOOTER_MAGIC {
            return Err(QuireError::corruption(format!(
                "bad footer magic {magic:#010x}"
            )));
        }
        let expected = self.read_u32()?;
        let actual = crc32fast::hash(&body);
        if actual != expected {
            return Err(QuireError::corruption(format!(
                "checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"
            )));
        }
        Ok(())
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn eof_as_corruption(err: std::io::Error) -> QuireError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        QuireError::corruption("unexpected end of input")
    } else {
        QuireError::Io(err)
    }
}

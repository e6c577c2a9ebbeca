//! Per-document length normalization bytes (`.nrm`).

use std::sync::Arc;

use ahash::AHashMap;

use crate::error::{QuireError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const NORMS_MAGIC: u32 = 0x4E52_4D31; // "NRM1"
const NORMS_VERSION: u32 = 1;

/// Encode a float into one byte: 3-bit mantissa, 5-bit exponent, exponent
/// bias 15. Values round down; zero maps to 0, and positive values too
/// small to represent map to 1.
pub fn float_to_byte(value: f32) -> u8 {
    let bits = value.to_bits() as i32;
    let small = bits >> (24 - 3);
    let zero_exp = (63 - 15) << 3;
    if small <= zero_exp {
        return if bits <= 0 { 0 } else { 1 };
    }
    if small >= zero_exp + 0x100 {
        return u8::MAX;
    }
    (small - zero_exp) as u8
}

pub fn byte_to_float(byte: u8) -> f32 {
    if byte == 0 {
        return 0.0;
    }
    let bits = ((byte as u32) << (24 - 3)) + ((63 - 15) << 24);
    f32::from_bits(bits)
}

/// Norm byte for a field holding `length` tokens.
pub fn encode_norm(length: u32) -> u8 {
    float_to_byte(1.0 / (length.max(1) as f32).sqrt())
}

/// Write one `max_doc`-byte row per normed field.
pub fn write_norms(
    storage: &Arc<dyn Storage>,
    file_name: &str,
    max_doc: u32,
    norms: &[(u32, Vec<u8>)],
) -> Result<()> {
    let mut writer = StructWriter::new(storage.create_output(file_name)?);
    writer.write_header(NORMS_MAGIC, NORMS_VERSION)?;
    writer.write_varint(max_doc as u64)?;
    writer.write_varint(norms.len() as u64)?;
    for (field, bytes) in norms {
        if bytes.len() != max_doc as usize {
            return Err(QuireError::invalid_argument(format!(
                "norms for field {field} hold {} bytes, segment has {max_doc} documents",
                bytes.len()
            )));
        }
        writer.write_varint(*field as u64)?;
        writer.write_bytes(bytes)?;
    }
    writer.write_footer()?;
    writer.close()
}

/// All norm rows of a segment, keyed by field number.
#[derive(Debug, Clone, Default)]
pub struct NormsReader {
    rows: AHashMap<u32, Vec<u8>>,
}

impl NormsReader {
    pub fn open(storage: &Arc<dyn Storage>, file_name: &str, max_doc: u32) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(file_name)?)?;
        reader.check_footer()?;
        reader.seek(0)?;
        reader.check_header(NORMS_MAGIC, NORMS_VERSION, NORMS_VERSION)?;
        let stored_max_doc = reader.read_varint_u32()?;
        if stored_max_doc != max_doc {
            return Err(QuireError::corruption(format!(
                "{file_name}: norms cover {stored_max_doc} documents, segment has {max_doc}"
            )));
        }
        let count = reader.read_varint()? as usize;
        let mut rows = AHashMap::with_capacity(count);
        for _ in 0..count {
            let field = reader.read_varint_u32()?;
            rows.insert(field, reader.read_bytes(max_doc as usize)?);
        }
        Ok(NormsReader { rows })
    }

    pub fn norms(&self, field: u32) -> Option<&[u8]> {
        self.rows.get(&field).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_small_float() {
        assert_eq!(float_to_byte(0.0), 0);
        assert_eq!(float_to_byte(1.0), 124);
        assert_eq!(byte_to_float(124), 1.0);
        assert_eq!(float_to_byte(1e-30), 1);
        assert_eq!(float_to_byte(f32::MAX), 255);
        // 0.5 is exactly representable.
        assert_eq!(byte_to_float(float_to_byte(0.5)), 0.5);
    }

    #[test]
    fn test_encode_norm_decreases_with_length() {
        assert_eq!(encode_norm(0), encode_norm(1));
        assert!(encode_norm(1) > encode_norm(4));
        assert!(encode_norm(4) > encode_norm(100));
        assert_eq!(byte_to_float(encode_norm(4)), 0.5);
    }

    #[test]
    fn test_write_read() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        write_norms(&storage, "_0.nrm", 3, &[(0, vec![124, 120, 0]), (2, vec![1, 2, 3])])
            .unwrap();
        let reader = NormsReader::open(&storage, "_0.nrm", 3).unwrap();
        assert_eq!(reader.norms(0), Some(&[124u8, 120, 0][..]));
        assert_eq!(reader.norms(2), Some(&[1u8, 2, 3][..]));
        assert_eq!(reader.norms(1), None);
        assert!(NormsReader::open(&storage, "_0.nrm", 4).is_err());
    }

    #[test]
    fn test_row_length_checked() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        assert!(write_norms(&storage, "_0.nrm", 3, &[(0, vec![1])]).is_err());
    }
}

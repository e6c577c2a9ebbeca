//! Compression strategies for numeric columns.
//!
//! A strategy is chosen from one pass over the values and stored in the
//! field's metadata entry together with its parameters, so readers decode
//! without scanning the data.

use ahash::AHashSet;
use log::debug;

use crate::config::CodecConfig;
use crate::error::{QuireError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::packed::{
    bits_required, block_packed_size_estimate, packed_size_bytes, read_block_packed, read_packed,
    write_block_packed, write_packed,
};

const TAG_DELTA: u8 = 0;
const TAG_TABLE: u8 = 1;
const TAG_UNCOMPRESSED: u8 = 2;
const TAG_GCD: u8 = 3;

/// Table widths above this are stored as one signed byte per document when
/// the values allow it.
const MAX_PACKED_TABLE_BITS: u32 = 4;

/// How a numeric column is laid out in the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericStrategy {
    /// One signed byte per document.
    Uncompressed,
    /// Sorted distinct values, then packed per-document table indexes.
    TableCompressed { table: Vec<i64>, bits_per_value: u32 },
    /// Block-packed raw values.
    DeltaCompressed { block_size: usize },
    /// Block-packed `(value - min) / gcd`.
    GcdCompressed { min: i64, gcd: i64, block_size: usize },
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl NumericStrategy {
    /// Pick the encoding for `values`.
    pub fn select(values: &[i64], config: &CodecConfig) -> NumericStrategy {
        let first = values.first().copied().unwrap_or(0);
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut common_divisor = 0u64;
        let mut distinct = Some(AHashSet::new());

        for &value in values {
            min = min.min(value);
            max = max.max(value);
            if common_divisor != 1 {
                // Beyond half the range, value - first could overflow.
                if value < i64::MIN / 2 || value > i64::MAX / 2 {
                    common_divisor = 1;
                } else {
                    common_divisor = gcd(common_divisor, (value - first).unsigned_abs());
                }
            }
            if let Some(set) = distinct.as_mut() {
                set.insert(value);
                if set.len() > config.max_table_values {
                    distinct = None;
                }
            }
        }
        let block_size = config.doc_values_block_size;
        let gcd_strategy = || {
            let quotients = gcd_quotients(values, min, common_divisor as i64);
            (
                NumericStrategy::GcdCompressed {
                    min,
                    gcd: common_divisor as i64,
                    block_size,
                },
                block_packed_size_estimate(&quotients, block_size),
            )
        };

        let strategy = match distinct {
            Some(set) => {
                let mut table: Vec<i64> = set.into_iter().collect();
                table.sort_unstable();
                let bits_per_value = bits_required(table.len().saturating_sub(1) as u64);
                let table_size = 8 * table.len() as u64 + packed_size_bytes(values.len(), bits_per_value);
                let gcd_choice = if common_divisor > 1 {
                    Some(gcd_strategy())
                } else {
                    None
                };
                match gcd_choice {
                    Some((strategy, gcd_size)) if gcd_size < table_size => strategy,
                    _ if bits_per_value > MAX_PACKED_TABLE_BITS
                        && min >= i8::MIN as i64
                        && max <= i8::MAX as i64 =>
                    {
                        NumericStrategy::Uncompressed
                    }
                    _ => NumericStrategy::TableCompressed {
                        table,
                        bits_per_value,
                    },
                }
            }
            None if common_divisor > 1 => gcd_strategy().0,
            None => NumericStrategy::DeltaCompressed { block_size },
        };
        debug!(
            "numeric strategy for {} values: {}",
            values.len(),
            strategy.name()
        );
        strategy
    }

    pub fn name(&self) -> &'static str {
        match self {
            NumericStrategy::Uncompressed => "UNCOMPRESSED",
            NumericStrategy::TableCompressed { .. } => "TABLE_COMPRESSED",
            NumericStrategy::DeltaCompressed { .. } => "DELTA_COMPRESSED",
            NumericStrategy::GcdCompressed { .. } => "GCD_COMPRESSED",
        }
    }

    /// Write the tag and parameters to the metadata stream.
    pub fn write_meta<W: StorageOutput>(&self, meta: &mut StructWriter<W>) -> Result<()> {
        match self {
            NumericStrategy::Uncompressed => meta.write_u8(TAG_UNCOMPRESSED),
            NumericStrategy::TableCompressed {
                table,
                bits_per_value,
            } => {
                meta.write_u8(TAG_TABLE)?;
                meta.write_varint(table.len() as u64)?;
                for &value in table {
                    meta.write_i64(value)?;
                }
                meta.write_varint(*bits_per_value as u64)
            }
            NumericStrategy::DeltaCompressed { block_size } => {
                meta.write_u8(TAG_DELTA)?;
                meta.write_varint(*block_size as u64)
            }
            NumericStrategy::GcdCompressed {
                min,
                gcd,
                block_size,
            } => {
                meta.write_u8(TAG_GCD)?;
                meta.write_i64(*min)?;
                meta.write_i64(*gcd)?;
                meta.write_varint(*block_size as u64)
            }
        }
    }

    pub fn read_meta<R: StorageInput>(meta: &mut StructReader<R>) -> Result<Self> {
        match meta.read_u8()? {
            TAG_UNCOMPRESSED => Ok(NumericStrategy::Uncompressed),
            TAG_TABLE => {
                let size = meta.read_varint()? as usize;
                if size > 256 {
                    return Err(QuireError::corruption(format!(
                        "table of {size} values"
                    )));
                }
                let table = (0..size)
                    .map(|_| meta.read_i64())
                    .collect::<Result<Vec<_>>>()?;
                let bits_per_value = meta.read_varint_u32()?;
                if bits_per_value > 8 {
                    return Err(QuireError::corruption(format!(
                        "table index width {bits_per_value}"
                    )));
                }
                Ok(NumericStrategy::TableCompressed {
                    table,
                    bits_per_value,
                })
            }
            TAG_DELTA => Ok(NumericStrategy::DeltaCompressed {
                block_size: meta.read_varint()? as usize,
            }),
            TAG_GCD => {
                let min = meta.read_i64()?;
                let gcd = meta.read_i64()?;
                if gcd <= 1 {
                    return Err(QuireError::corruption(format!("gcd of {gcd}")));
                }
                Ok(NumericStrategy::GcdCompressed {
                    min,
                    gcd,
                    block_size: meta.read_varint()? as usize,
                })
            }
            other => Err(QuireError::corruption(format!(
                "unknown numeric strategy tag {other}"
            ))),
        }
    }

    /// Write `values` to the data stream.
    pub fn encode<W: StorageOutput>(&self, data: &mut StructWriter<W>, values: &[i64]) -> Result<()> {
        match self {
            NumericStrategy::Uncompressed => {
                let bytes: Vec<u8> = values.iter().map(|&v| v as i8 as u8).collect();
                data.write_bytes(&bytes)
            }
            NumericStrategy::TableCompressed {
                table,
                bits_per_value,
            } => {
                let ords = values
                    .iter()
                    .map(|value| {
                        table.binary_search(value).map(|ord| ord as u64).map_err(|_| {
                            QuireError::invalid_argument(format!("value {value} not in table"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                write_packed(data, &ords, *bits_per_value)
            }
            NumericStrategy::DeltaCompressed { block_size } => {
                write_block_packed(data, values, *block_size)
            }
            NumericStrategy::GcdCompressed {
                min,
                gcd,
                block_size,
            } => write_block_packed(data, &gcd_quotients(values, *min, *gcd), *block_size),
        }
    }

    /// Read `count` values from the data stream.
    pub fn decode<R: StorageInput>(&self, data: &mut StructReader<R>, count: usize) -> Result<Vec<i64>> {
        match self {
            NumericStrategy::Uncompressed => Ok(data
                .read_bytes(count)?
                .into_iter()
                .map(|b| b as i8 as i64)
                .collect()),
            NumericStrategy::TableCompressed {
                table,
                bits_per_value,
            } => {
                let ords = read_packed(data, count, *bits_per_value)?;
                (0..count)
                    .map(|i| {
                        let ord = ords.get(i) as usize;
                        table.get(ord).copied().ok_or_else(|| {
                            QuireError::corruption(format!(
                                "table index {ord} out of range ({} values)",
                                table.len()
                            ))
                        })
                    })
                    .collect()
            }
            NumericStrategy::DeltaCompressed { block_size } => {
                read_block_packed(data, count, *block_size)
            }
            NumericStrategy::GcdCompressed {
                min,
                gcd,
                block_size,
            } => Ok(read_block_packed(data, count, *block_size)?
                .into_iter()
                .map(|q| min.wrapping_add(q.wrapping_mul(*gcd)))
                .collect()),
        }
    }
}

fn gcd_quotients(values: &[i64], min: i64, gcd: i64) -> Vec<i64> {
    values.iter().map(|&v| (v - min) / gcd).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn roundtrip(values: &[i64]) -> (NumericStrategy, Vec<i64>) {
        let config = CodecConfig::default();
        let strategy = NumericStrategy::select(values, &config);
        let storage = MemoryStorage::default();
        let mut writer = StructWriter::new(storage.create_output("dv").unwrap());
        strategy.write_meta(&mut writer).unwrap();
        strategy.encode(&mut writer, values).unwrap();
        writer.close().unwrap();

        let mut reader = StructReader::new(storage.open_input("dv").unwrap()).unwrap();
        let read_strategy = NumericStrategy::read_meta(&mut reader).unwrap();
        assert_eq!(read_strategy, strategy);
        let decoded = read_strategy.decode(&mut reader, values.len()).unwrap();
        (strategy, decoded)
    }

    #[test]
    fn test_identical_values_use_table() {
        let values = vec![42i64; 1000];
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(
            strategy,
            NumericStrategy::TableCompressed {
                table: vec![42],
                bits_per_value: 0
            }
        );
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_gcd_selected_for_multiples() {
        let values = vec![1000, 3000, 5000, 7000];
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(
            strategy,
            NumericStrategy::GcdCompressed {
                min: 1000,
                gcd: 2000,
                block_size: 4096
            }
        );
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_small_byte_range_is_uncompressed() {
        let values: Vec<i64> = (0..200).map(|i| (i % 100) - 50).collect();
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(strategy, NumericStrategy::Uncompressed);
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_few_distinct_wide_values_use_table() {
        let values: Vec<i64> = (0..500).map(|i| [7, -1_000_000, 1 << 40][i % 3]).collect();
        let (strategy, decoded) = roundtrip(&values);
        assert!(matches!(
            strategy,
            NumericStrategy::TableCompressed {
                bits_per_value: 2,
                ..
            }
        ));
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_many_distinct_values_use_delta() {
        let values: Vec<i64> = (0..1000).map(|i| i * 7 + (i % 3)).collect();
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(strategy, NumericStrategy::DeltaCompressed { block_size: 4096 });
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_many_distinct_multiples_use_gcd() {
        let values: Vec<i64> = (0..1000).map(|i| -5 + i * 15).collect();
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(
            strategy,
            NumericStrategy::GcdCompressed {
                min: -5,
                gcd: 15,
                block_size: 4096
            }
        );
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_extreme_values_skip_gcd() {
        let values: Vec<i64> = (0..300).map(|i| i64::MAX - i * 4).collect();
        let (strategy, decoded) = roundtrip(&values);
        assert_eq!(strategy, NumericStrategy::DeltaCompressed { block_size: 4096 });
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_unknown_tag_is_corruption() {
        let storage = MemoryStorage::default();
        let mut writer = StructWriter::new(storage.create_output("dv").unwrap());
        writer.write_u8(9).unwrap();
        writer.close().unwrap();
        let mut reader = StructReader::new(storage.open_input("dv").unwrap()).unwrap();
        assert!(NumericStrategy::read_meta(&mut reader).unwrap_err().is_corruption());
    }
}

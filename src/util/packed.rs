//! Packed integer encodings.
//!
//! Three layouts are provided:
//!
//! - **Packed**: `count` unsigned values at a fixed bit width, stored in
//!   little-endian 64-bit words, least significant bits first.
//! - **Block-packed**: values split into fixed-size blocks; each block is a
//!   bit-width byte, the block minimum (zig-zag varint), then the offsets from
//!   that minimum packed at the block's own width.
//! - **Monotonic block-packed**: for non-decreasing sequences such as
//!   cumulative offsets; each block stores its first value and average slope
//!   and packs only the zig-zag deviation from the line they describe.

use crate::error::{QuireError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{StorageInput, StorageOutput};
use crate::util::varint::{zigzag_decode, zigzag_encode};

/// Number of bits needed to represent `max_value` (0 for 0).
pub fn bits_required(max_value: u64) -> u32 {
    64 - max_value.leading_zeros()
}

/// Number of bytes [`write_packed`] produces for `count` values.
pub fn packed_size_bytes(count: usize, bits_per_value: u32) -> u64 {
    let bits = count as u64 * bits_per_value as u64;
    bits.div_ceil(64) * 8
}

fn mask(bits_per_value: u32) -> u64 {
    if bits_per_value == 64 {
        u64::MAX
    } else {
        (1u64 << bits_per_value) - 1
    }
}

/// Pack values into 64-bit words.
pub fn pack(values: &[u64], bits_per_value: u32) -> Vec<u64> {
    let total_bits = values.len() as u64 * bits_per_value as u64;
    let mut words = vec![0u64; total_bits.div_ceil(64) as usize];
    if bits_per_value == 0 {
        return words;
    }
    let mask = mask(bits_per_value);
    for (i, &value) in values.iter().enumerate() {
        let value = value & mask;
        let bit = i as u64 * bits_per_value as u64;
        let word = (bit / 64) as usize;
        let shift = (bit % 64) as u32;
        words[word] |= value << shift;
        if shift + bits_per_value > 64 {
            words[word + 1] |= value >> (64 - shift);
        }
    }
    words
}

/// Random-access view over packed values.
#[derive(Debug, Clone)]
pub struct PackedReader {
    words: Vec<u64>,
    bits_per_value: u32,
    len: usize,
}

impl PackedReader {
    pub fn new(words: Vec<u64>, bits_per_value: u32, len: usize) -> Result<Self> {
        if bits_per_value > 64 {
            return Err(QuireError::corruption(format!(
                "invalid bits per value: {bits_per_value}"
            )));
        }
        let needed = (len as u64 * bits_per_value as u64).div_ceil(64) as usize;
        if words.len() < needed {
            return Err(QuireError::corruption(format!(
                "packed data holds {} words, {needed} required",
                words.len()
            )));
        }
        Ok(PackedReader {
            words,
            bits_per_value,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits_per_value(&self) -> u32 {
        self.bits_per_value
    }

    pub fn get(&self, index: usize) -> u64 {
        debug_assert!(index < self.len);
        if self.bits_per_value == 0 {
            return 0;
        }
        let bit = index as u64 * self.bits_per_value as u64;
        let word = (bit / 64) as usize;
        let shift = (bit % 64) as u32;
        let mut value = self.words[word] >> shift;
        if shift + self.bits_per_value > 64 {
            value |= self.words[word + 1] << (64 - shift);
        }
        value & mask(self.bits_per_value)
    }
}

/// Write `values` packed at `bits_per_value`.
pub fn write_packed<W: StorageOutput>(
    out: &mut StructWriter<W>,
    values: &[u64],
    bits_per_value: u32,
) -> Result<()> {
    for word in pack(values, bits_per_value) {
        out.write_u64(word)?;
    }
    Ok(())
}

/// Read `count` values written by [`write_packed`].
pub fn read_packed<R: StorageInput>(
    input: &mut StructReader<R>,
    count: usize,
    bits_per_value: u32,
) -> Result<PackedReader> {
    let num_words = (count as u64 * bits_per_value as u64).div_ceil(64) as usize;
    let mut words = Vec::with_capacity(num_words);
    for _ in 0..num_words {
        words.push(input.read_u64()?);
    }
    PackedReader::new(words, bits_per_value, count)
}

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || !block_size.is_power_of_two() {
        return Err(QuireError::invalid_argument(format!(
            "block size must be a power of two, got {block_size}"
        )));
    }
    Ok(())
}

/// Write a block-packed sequence.
pub fn write_block_packed<W: StorageOutput>(
    out: &mut StructWriter<W>,
    values: &[i64],
    block_size: usize,
) -> Result<()> {
    check_block_size(block_size)?;
    for block in values.chunks(block_size) {
        let min = block.iter().copied().min().unwrap_or(0);
        let max = block.iter().copied().max().unwrap_or(0);
        let bits = bits_required(max.wrapping_sub(min) as u64);
        out.write_u8(bits as u8)?;
        out.write_zigzag(min)?;
        if bits > 0 {
            let deltas: Vec<u64> = block.iter().map(|&v| v.wrapping_sub(min) as u64).collect();
            write_packed(out, &deltas, bits)?;
        }
    }
    Ok(())
}

/// Upper bound of the bytes [`write_block_packed`] would produce.
pub fn block_packed_size_estimate(values: &[i64], block_size: usize) -> u64 {
    let mut size = 0u64;
    for block in values.chunks(block_size.max(1)) {
        let min = block.iter().copied().min().unwrap_or(0);
        let max = block.iter().copied().max().unwrap_or(0);
        let bits = bits_required(max.wrapping_sub(min) as u64);
        size += 1 + crate::util::varint::encode_u64(zigzag_encode(min)).len() as u64;
        size += packed_size_bytes(block.len(), bits);
    }
    size
}

/// Read `count` values written by [`write_block_packed`].
pub fn read_block_packed<R: StorageInput>(
    input: &mut StructReader<R>,
    count: usize,
    block_size: usize,
) -> Result<Vec<i64>> {
    check_block_size(block_size)?;
    let mut values = Vec::with_capacity(count);
    while values.len() < count {
        let len = block_size.min(count - values.len());
        let bits = input.read_u8()? as u32;
        if bits > 64 {
            return Err(QuireError::corruption(format!(
                "block bit width {bits} out of range"
            )));
        }
        let min = input.read_zigzag()?;
        if bits == 0 {
            values.extend(std::iter::repeat_n(min, len));
        } else {
            let packed = read_packed(input, len, bits)?;
            values.extend((0..len).map(|i| min.wrapping_add(packed.get(i) as i64)));
        }
    }
    Ok(values)
}

fn expected_at(first: i64, average: f32, index: usize) -> i64 {
    first.wrapping_add((average * index as f32) as i64)
}

/// Write a monotonic block-packed sequence.
pub fn write_monotonic<W: StorageOutput>(
    out: &mut StructWriter<W>,
    values: &[i64],
    block_size: usize,
) -> Result<()> {
    check_block_size(block_size)?;
    for block in values.chunks(block_size) {
        let first = block[0];
        let average = if block.len() > 1 {
            (block[block.len() - 1].wrapping_sub(first)) as f32 / (block.len() - 1) as f32
        } else {
            0.0
        };
        let deviations: Vec<u64> = block
            .iter()
            .enumerate()
            .map(|(i, &v)| zigzag_encode(v.wrapping_sub(expected_at(first, average, i))))
            .collect();
        let bits = bits_required(deviations.iter().copied().max().unwrap_or(0));
        out.write_zigzag(first)?;
        out.write_u32(average.to_bits())?;
        out.write_u8(bits as u8)?;
        if bits > 0 {
            write_packed(out, &deviations, bits)?;
        }
    }
    Ok(())
}

/// Read `count` values written by [`write_monotonic`].
pub fn read_monotonic<R: StorageInput>(
    input: &mut StructReader<R>,
    count: usize,
    block_size: usize,
) -> Result<Vec<i64>> {
    check_block_size(block_size)?;
    let mut values = Vec::with_capacity(count);
    while values.len() < count {
        let len = block_size.min(count - values.len());
        let first = input.read_zigzag()?;
        let average = f32::from_bits(input.read_u32()?);
        let bits = input.read_u8()? as u32;
        if bits > 64 {
            return Err(QuireError::corruption(format!(
                "block bit width {bits} out of range"
            )));
        }
        if bits == 0 {
            values.extend((0..len).map(|i| expected_at(first, average, i)));
        } else {
            let packed = read_packed(input, len, bits)?;
            values.extend(
                (0..len).map(|i| {
                    expected_at(first, average, i).wrapping_add(zigzag_decode(packed.get(i)))
                }),
            );
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn write_then_read<F, G, T>(write: F, read: G) -> T
    where
        F: FnOnce(&mut StructWriter<Box<dyn StorageOutput>>) -> Result<()>,
        G: FnOnce(&mut StructReader<Box<dyn StorageInput>>) -> Result<T>,
    {
        let storage = MemoryStorage::default();
        let mut writer = StructWriter::new(storage.create_output("p").unwrap());
        write(&mut writer).unwrap();
        writer.close().unwrap();
        let mut reader = StructReader::new(storage.open_input("p").unwrap()).unwrap();
        let result = read(&mut reader).unwrap();
        assert_eq!(reader.remaining(), 0);
        result
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
    }

    #[test]
    fn test_pack_crossing_word_boundary() {
        let values: Vec<u64> = (0..100).map(|i| (i * 7919) % 8192).collect();
        let words = pack(&values, 13);
        let reader = PackedReader::new(words, 13, values.len()).unwrap();
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(reader.get(i), v);
        }
    }

    #[test]
    fn test_pack_full_width() {
        let values = vec![u64::MAX, 0, 1 << 63];
        let reader = PackedReader::new(pack(&values, 64), 64, 3).unwrap();
        assert_eq!(reader.get(0), u64::MAX);
        assert_eq!(reader.get(2), 1 << 63);
    }

    #[test]
    fn test_block_packed_mixed_blocks() {
        // First block constant, second block wide, third partial.
        let mut values = vec![42i64; 64];
        values.extend((0..64).map(|i| i * 1_000_003 - 5));
        values.extend([i64::MIN, i64::MAX, 0]);

        let decoded = write_then_read(
            |w| write_block_packed(w, &values, 64),
            |r| read_block_packed(r, values.len(), 64),
        );
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_block_packed_estimate_matches_output() {
        let values: Vec<i64> = (0..300).map(|i| (i * 37) % 101).collect();
        let storage = MemoryStorage::default();
        let mut writer = StructWriter::new(storage.create_output("p").unwrap());
        write_block_packed(&mut writer, &values, 128).unwrap();
        assert_eq!(writer.position(), block_packed_size_estimate(&values, 128));
    }

    #[test]
    fn test_monotonic_offsets() {
        let mut offsets = Vec::new();
        let mut end = 0i64;
        for i in 0..1000 {
            end += (i % 17) as i64;
            offsets.push(end);
        }
        let decoded = write_then_read(
            |w| write_monotonic(w, &offsets, 256),
            |r| read_monotonic(r, offsets.len(), 256),
        );
        assert_eq!(decoded, offsets);
    }

    #[test]
    fn test_rejects_non_power_of_two_block() {
        let storage = MemoryStorage::default();
        let mut writer = StructWriter::new(storage.create_output("p").unwrap());
        assert!(write_block_packed(&mut writer, &[1, 2, 3], 100).is_err());
    }
}

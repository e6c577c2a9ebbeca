//! Reads doc values written by [`DocValuesWriter`](super::DocValuesWriter).

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::doc_values::strategy::NumericStrategy;
use crate::doc_values::{
    DOC_VALUES_DATA_MAGIC, DOC_VALUES_META_MAGIC, DOC_VALUES_VERSION, END_OF_FIELDS, EntryType,
};
use crate::error::{QuireError, Result};
use crate::storage::structured::StructReader;
use crate::storage::{Storage, StorageInput};
use crate::util::fst::FstDictionary;
use crate::util::packed::read_monotonic;
use crate::util::varint::VarintCursor;

#[derive(Debug, Clone)]
enum Entry {
    Number {
        pointer: u64,
        strategy: NumericStrategy,
    },
    Bytes {
        pointer: u64,
        num_bytes: u64,
        min_len: u64,
        max_len: u64,
        addresses: Option<(u64, usize)>,
    },
    Fst {
        pointer: u64,
        num_ords: u64,
    },
}

/// A decoded single-valued sorted column.
#[derive(Debug, Clone)]
pub struct SortedDocValues {
    ords: Vec<u64>,
    dictionary: FstDictionary,
}

impl SortedDocValues {
    pub fn ord(&self, doc: u32) -> Option<u64> {
        self.ords.get(doc as usize).copied()
    }

    pub fn value(&self, doc: u32) -> Option<Vec<u8>> {
        self.ord(doc).and_then(|ord| self.dictionary.term(ord))
    }

    pub fn value_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn dictionary(&self) -> &FstDictionary {
        &self.dictionary
    }
}

/// A decoded multi-valued sorted-set column.
#[derive(Debug, Clone)]
pub struct SortedSetDocValues {
    ords: Vec<Vec<u64>>,
    dictionary: FstDictionary,
}

impl SortedSetDocValues {
    pub fn ords(&self, doc: u32) -> &[u64] {
        self.ords.get(doc as usize).map_or(&[], Vec::as_slice)
    }

    pub fn values(&self, doc: u32) -> Vec<Vec<u8>> {
        self.ords(doc)
            .iter()
            .filter_map(|&ord| self.dictionary.term(ord))
            .collect()
    }

    pub fn value_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn dictionary(&self) -> &FstDictionary {
        &self.dictionary
    }
}

/// Metadata of all columns, with the data stream decoded on demand.
#[derive(Debug)]
pub struct DocValuesReader {
    max_doc: u32,
    entries: AHashMap<(u32, EntryType), Entry>,
    data: Mutex<StructReader<Box<dyn StorageInput>>>,
}

impl DocValuesReader {
    pub fn open(
        storage: &Arc<dyn Storage>,
        meta_file: &str,
        data_file: &str,
        max_doc: u32,
    ) -> Result<Self> {
        let mut meta = StructReader::new(storage.open_input(meta_file)?)?;
        meta.check_footer()?;
        meta.seek(0)?;
        meta.check_header(DOC_VALUES_META_MAGIC, DOC_VALUES_VERSION, DOC_VALUES_VERSION)?;
        let stored_max_doc = meta.read_varint_u32()?;
        if stored_max_doc != max_doc {
            return Err(QuireError::corruption(format!(
                "{meta_file}: doc values cover {stored_max_doc} documents, segment has {max_doc}"
            )));
        }

        let mut entries = AHashMap::new();
        loop {
            let field = meta.read_varint_u32()?;
            if field == END_OF_FIELDS {
                break;
            }
            let entry_type = EntryType::from_byte(meta.read_u8()?)?;
            let pointer = meta.read_u64()?;
            let entry = match entry_type {
                EntryType::Number => Entry::Number {
                    pointer,
                    strategy: NumericStrategy::read_meta(&mut meta)?,
                },
                EntryType::Bytes => {
                    let num_bytes = meta.read_u64()?;
                    let min_len = meta.read_varint()?;
                    let max_len = meta.read_varint()?;
                    let addresses = if min_len != max_len {
                        Some((meta.read_u64()?, meta.read_varint()? as usize))
                    } else {
                        None
                    };
                    Entry::Bytes {
                        pointer,
                        num_bytes,
                        min_len,
                        max_len,
                        addresses,
                    }
                }
                EntryType::Fst => Entry::Fst {
                    pointer,
                    num_ords: meta.read_varint()?,
                },
            };
            if entries.insert((field, entry_type), entry).is_some() {
                return Err(QuireError::corruption(format!(
                    "{meta_file}: duplicate {entry_type:?} entry for field {field}"
                )));
            }
        }
        if meta.remaining() != crate::storage::structured::FOOTER_LENGTH {
            return Err(QuireError::corruption(format!(
                "{meta_file}: trailing bytes after end marker"
            )));
        }

        let mut data = StructReader::new(storage.open_input(data_file)?)?;
        data.check_footer()?;
        data.seek(0)?;
        data.check_header(DOC_VALUES_DATA_MAGIC, DOC_VALUES_VERSION, DOC_VALUES_VERSION)?;
        Ok(DocValuesReader {
            max_doc,
            entries,
            data: Mutex::new(data),
        })
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Strategy of a field's numeric entry, as recorded in the metadata.
    pub fn numeric_strategy(&self, field: u32) -> Option<&NumericStrategy> {
        match self.entries.get(&(field, EntryType::Number)) {
            Some(Entry::Number { strategy, .. }) => Some(strategy),
            _ => None,
        }
    }

    pub fn numeric(&self, field: u32) -> Result<Option<Vec<i64>>> {
        match self.entries.get(&(field, EntryType::Number)) {
            Some(Entry::Number { pointer, strategy }) => {
                let mut data = self.data.lock();
                data.seek(*pointer)?;
                Ok(Some(strategy.decode(&mut *data, self.max_doc as usize)?))
            }
            _ => Ok(None),
        }
    }

    pub fn binary(&self, field: u32) -> Result<Option<Vec<Vec<u8>>>> {
        match self.entries.get(&(field, EntryType::Bytes)) {
            Some(entry) => self.read_binary(entry).map(Some),
            None => Ok(None),
        }
    }

    fn read_binary(&self, entry: &Entry) -> Result<Vec<Vec<u8>>> {
        let Entry::Bytes {
            pointer,
            num_bytes,
            min_len,
            max_len,
            addresses,
        } = entry
        else {
            return Err(QuireError::corruption("expected a bytes entry"));
        };
        let max_doc = self.max_doc as usize;
        let mut data = self.data.lock();
        data.seek(*pointer)?;
        let payload = data.read_bytes(*num_bytes as usize)?;

        let ends: Vec<u64> = match addresses {
            None => {
                if *min_len * max_doc as u64 != *num_bytes {
                    return Err(QuireError::corruption(format!(
                        "{max_doc} fixed-length values of {min_len} bytes in {num_bytes} bytes"
                    )));
                }
                (1..=max_doc as u64).map(|i| i * min_len).collect()
            }
            Some((address_pointer, block_size)) => {
                data.seek(*address_pointer)?;
                read_monotonic(&mut *data, max_doc, *block_size)?
                    .into_iter()
                    .map(|end| end as u64)
                    .collect()
            }
        };

        let mut values = Vec::with_capacity(max_doc);
        let mut start = 0u64;
        for end in ends {
            if end < start || end > *num_bytes || end - start > *max_len {
                return Err(QuireError::corruption(format!(
                    "bad binary address {end} after {start}"
                )));
            }
            values.push(payload[start as usize..end as usize].to_vec());
            start = end;
        }
        Ok(values)
    }

    fn dictionary(&self, field: u32) -> Result<Option<FstDictionary>> {
        match self.entries.get(&(field, EntryType::Fst)) {
            Some(Entry::Fst { pointer, num_ords }) => {
                let mut data = self.data.lock();
                data.seek(*pointer)?;
                Ok(Some(FstDictionary::read(&mut *data, *num_ords)?))
            }
            _ => Ok(None),
        }
    }

    pub fn sorted(&self, field: u32) -> Result<Option<SortedDocValues>> {
        let Some(dictionary) = self.dictionary(field)? else {
            return Ok(None);
        };
        let values = self.numeric(field)?.ok_or_else(|| {
            QuireError::corruption(format!("sorted field {field} has no ordinals"))
        })?;
        let ords = values
            .into_iter()
            .map(|ord| {
                u64::try_from(ord)
                    .ok()
                    .filter(|&ord| ord < dictionary.len() as u64)
                    .ok_or_else(|| QuireError::corruption(format!("ordinal {ord} out of range")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(SortedDocValues { ords, dictionary }))
    }

    pub fn sorted_set(&self, field: u32) -> Result<Option<SortedSetDocValues>> {
        let Some(dictionary) = self.dictionary(field)? else {
            return Ok(None);
        };
        let encoded = self.binary(field)?.ok_or_else(|| {
            QuireError::corruption(format!("sorted set field {field} has no ordinals"))
        })?;
        let value_count = dictionary.len() as u64;
        let mut ords = Vec::with_capacity(encoded.len());
        for bytes in &encoded {
            let mut cursor = VarintCursor::new(bytes);
            let mut doc_ords = Vec::new();
            let mut ord = 0u64;
            while !cursor.is_empty() {
                let delta = cursor.read_u64()?;
                if !doc_ords.is_empty() && delta == 0 {
                    return Err(QuireError::corruption("duplicate ordinal in sorted set"));
                }
                ord += delta;
                if ord >= value_count {
                    return Err(QuireError::corruption(format!(
                        "ordinal {ord} out of range ({value_count} values)"
                    )));
                }
                doc_ords.push(ord);
            }
            ords.push(doc_ords);
        }
        Ok(Some(SortedSetDocValues { ords, dictionary }))
    }
}

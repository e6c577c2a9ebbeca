//! Writes a segment's doc values (`.dvm` metadata + `.dvd` data).

use std::collections::BTreeSet;
use std::sync::Arc;

use ahash::AHashSet;
use log::debug;

use crate::config::CodecConfig;
use crate::doc_values::strategy::NumericStrategy;
use crate::doc_values::{
    DOC_VALUES_DATA_MAGIC, DOC_VALUES_META_MAGIC, DOC_VALUES_VERSION, EntryType, END_OF_FIELDS,
};
use crate::error::{QuireError, Result};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};
use crate::util::fst::FstDictionary;
use crate::util::packed::write_monotonic;
use crate::util::varint;

/// Appends one entry per column to the metadata stream and its payload to
/// the data stream. Every column must hold exactly one slot per document.
#[derive(Debug)]
pub struct DocValuesWriter {
    meta: StructWriter<Box<dyn StorageOutput>>,
    data: StructWriter<Box<dyn StorageOutput>>,
    config: CodecConfig,
    max_doc: u32,
    written: AHashSet<(u32, EntryType)>,
}

impl DocValuesWriter {
    pub fn new(
        storage: &Arc<dyn Storage>,
        meta_file: &str,
        data_file: &str,
        max_doc: u32,
        config: CodecConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut meta = StructWriter::new(storage.create_output(meta_file)?);
        meta.write_header(DOC_VALUES_META_MAGIC, DOC_VALUES_VERSION)?;
        meta.write_varint(max_doc as u64)?;
        let mut data = StructWriter::new(storage.create_output(data_file)?);
        data.write_header(DOC_VALUES_DATA_MAGIC, DOC_VALUES_VERSION)?;
        Ok(DocValuesWriter {
            meta,
            data,
            config,
            max_doc,
            written: AHashSet::new(),
        })
    }

    fn start_entry(&mut self, field: u32, entry_type: EntryType, len: usize) -> Result<()> {
        if len != self.max_doc as usize {
            return Err(QuireError::invalid_argument(format!(
                "field {field} has {len} values, segment has {} documents",
                self.max_doc
            )));
        }
        if field == END_OF_FIELDS {
            return Err(QuireError::invalid_argument("reserved field number"));
        }
        if !self.written.insert((field, entry_type)) {
            return Err(QuireError::invalid_argument(format!(
                "field {field} already has a {entry_type:?} entry"
            )));
        }
        self.meta.write_varint(field as u64)?;
        self.meta.write_u8(entry_type.to_byte())?;
        self.meta.write_u64(self.data.position())
    }

    /// Write a numeric column, returning the strategy it was encoded with.
    pub fn add_numeric(&mut self, field: u32, values: &[i64]) -> Result<NumericStrategy> {
        self.start_entry(field, EntryType::Number, values.len())?;
        let strategy = NumericStrategy::select(values, &self.config);
        strategy.write_meta(&mut self.meta)?;
        strategy.encode(&mut self.data, values)?;
        debug!("doc values field {field}: {}", strategy.name());
        Ok(strategy)
    }

    /// Write a binary column: the payloads back to back, then, unless every
    /// payload has the same length, their cumulative end offsets.
    pub fn add_binary<B: AsRef<[u8]>>(&mut self, field: u32, values: &[B]) -> Result<()> {
        self.start_entry(field, EntryType::Bytes, values.len())?;
        self.write_binary_payload(values)
    }

    fn write_binary_payload<B: AsRef<[u8]>>(&mut self, values: &[B]) -> Result<()> {
        let mut min_len = usize::MAX;
        let mut max_len = 0usize;
        let mut ends = Vec::with_capacity(values.len());
        let mut total = 0u64;
        for value in values {
            let bytes = value.as_ref();
            min_len = min_len.min(bytes.len());
            max_len = max_len.max(bytes.len());
            self.data.write_bytes(bytes)?;
            total += bytes.len() as u64;
            ends.push(total as i64);
        }
        if values.is_empty() {
            min_len = 0;
        }

        self.meta.write_u64(total)?;
        self.meta.write_varint(min_len as u64)?;
        self.meta.write_varint(max_len as u64)?;
        if min_len != max_len {
            let block_size = self.config.doc_values_block_size;
            self.meta.write_u64(self.data.position())?;
            self.meta.write_varint(block_size as u64)?;
            write_monotonic(&mut self.data, &ends, block_size)?;
        }
        Ok(())
    }

    fn add_dictionary(&mut self, field: u32, dictionary: &FstDictionary) -> Result<()> {
        if self.written.contains(&(field, EntryType::Fst)) {
            return Err(QuireError::invalid_argument(format!(
                "field {field} already has a dictionary"
            )));
        }
        self.written.insert((field, EntryType::Fst));
        self.meta.write_varint(field as u64)?;
        self.meta.write_u8(EntryType::Fst.to_byte())?;
        self.meta.write_u64(self.data.position())?;
        self.meta.write_varint(dictionary.len() as u64)?;
        dictionary.write(&mut self.data)
    }

    /// Write a single-valued sorted column.
    pub fn add_sorted<B: AsRef<[u8]>>(&mut self, field: u32, values: &[Option<B>]) -> Result<()> {
        let distinct: BTreeSet<&[u8]> = values
            .iter()
            .filter_map(|value| value.as_ref().map(AsRef::as_ref))
            .collect();
        let keys: Vec<&[u8]> = distinct.into_iter().collect();
        let ords: Vec<i64> = values
            .iter()
            .map(|value| match value {
                Some(bytes) => keys
                    .binary_search(&bytes.as_ref())
                    .map(|ord| ord as i64)
                    .unwrap_or(-1),
                None => -1,
            })
            .collect();
        self.add_sorted_ords(field, keys, ords)
    }

    /// Write a sorted column from its dictionary (sorted, distinct keys) and
    /// one ordinal per document, `-1` marking a missing value.
    ///
    /// If any document is missing a value and the empty string is already a
    /// key, missing documents take its ordinal; otherwise the empty string
    /// is inserted at ordinal 0 and every other ordinal shifts up by one.
    pub fn add_sorted_ords(
        &mut self,
        field: u32,
        mut keys: Vec<&[u8]>,
        mut ords: Vec<i64>,
    ) -> Result<()> {
        if ords.len() != self.max_doc as usize {
            return Err(QuireError::invalid_argument(format!(
                "field {field} has {} values, segment has {} documents",
                ords.len(),
                self.max_doc
            )));
        }
        if let Some(bad) = ords
            .iter()
            .find(|&&ord| ord < -1 || ord >= keys.len() as i64)
        {
            return Err(QuireError::invalid_argument(format!(
                "ordinal {bad} out of range for {} keys",
                keys.len()
            )));
        }

        if ords.contains(&-1) {
            match keys.binary_search(&&b""[..]) {
                Ok(empty_ord) => {
                    for ord in ords.iter_mut().filter(|ord| **ord == -1) {
                        *ord = empty_ord as i64;
                    }
                }
                Err(_) => {
                    keys.insert(0, b"");
                    for ord in ords.iter_mut() {
                        *ord += 1;
                    }
                }
            }
        }

        let dictionary = FstDictionary::build(keys.iter())?;
        self.add_dictionary(field, &dictionary)?;
        self.add_numeric(field, &ords)?;
        Ok(())
    }

    /// Write a multi-valued sorted-set column.
    pub fn add_sorted_set<B: AsRef<[u8]>>(&mut self, field: u32, values: &[Vec<B>]) -> Result<()> {
        let distinct: BTreeSet<&[u8]> = values
            .iter()
            .flat_map(|doc| doc.iter().map(AsRef::as_ref))
            .collect();
        let keys: Vec<&[u8]> = distinct.into_iter().collect();
        let ords: Vec<Vec<u64>> = values
            .iter()
            .map(|doc| {
                doc.iter()
                    .filter_map(|value| keys.binary_search(&value.as_ref()).ok())
                    .map(|ord| ord as u64)
                    .collect()
            })
            .collect();
        self.add_sorted_set_ords(field, &keys, &ords)
    }

    /// Write a sorted-set column from its dictionary and each document's
    /// ordinals: the dictionary, then per document the sorted, de-duplicated
    /// ordinals as varint deltas.
    pub fn add_sorted_set_ords<K: AsRef<[u8]>>(
        &mut self,
        field: u32,
        keys: &[K],
        ords: &[Vec<u64>],
    ) -> Result<()> {
        if ords.len() != self.max_doc as usize {
            return Err(QuireError::invalid_argument(format!(
                "field {field} has {} values, segment has {} documents",
                ords.len(),
                self.max_doc
            )));
        }

        let mut encoded = Vec::with_capacity(ords.len());
        for doc in ords {
            let mut doc = doc.clone();
            doc.sort_unstable();
            doc.dedup();
            if let Some(&last) = doc.last() {
                if last >= keys.len() as u64 {
                    return Err(QuireError::invalid_argument(format!(
                        "ordinal {last} out of range for {} keys",
                        keys.len()
                    )));
                }
            }
            let mut bytes = Vec::new();
            let mut previous = 0u64;
            for ord in doc {
                varint::write_u64(&mut bytes, ord - previous);
                previous = ord;
            }
            encoded.push(bytes);
        }

        let dictionary = FstDictionary::build(keys.iter())?;
        self.add_dictionary(field, &dictionary)?;
        self.start_entry(field, EntryType::Bytes, encoded.len())?;
        self.write_binary_payload(&encoded)
    }

    /// Write the end marker and checksum footer, then close both streams.
    pub fn finish(mut self) -> Result<()> {
        self.meta.write_varint(END_OF_FIELDS as u64)?;
        self.meta.write_footer()?;
        self.data.write_footer()?;
        self.meta.close()?;
        self.data.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn writer(max_doc: u32) -> DocValuesWriter {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        DocValuesWriter::new(&storage, "_0.dvm", "_0.dvd", max_doc, CodecConfig::default()).unwrap()
    }

    #[test]
    fn test_entry_written_once_per_field() {
        let mut writer = writer(2);
        writer.add_numeric(0, &[1, 2]).unwrap();
        assert!(matches!(
            writer.add_numeric(0, &[3, 4]),
            Err(QuireError::InvalidArgument(_))
        ));
        // A different entry type for the same field is a separate slot.
        writer.add_binary(0, &[b"a", b"b"]).unwrap();
        assert!(writer.add_numeric(END_OF_FIELDS, &[0, 0]).is_err());
        writer.finish().unwrap();
    }

    #[test]
    fn test_sorted_ords_are_range_checked() {
        let mut writer = writer(3);
        let keys: Vec<&[u8]> = vec![b"a".as_slice(), b"b".as_slice()];
        assert!(writer.add_sorted_ords(1, keys.clone(), vec![0, 2, -1]).is_err());
        assert!(writer.add_sorted_ords(1, keys.clone(), vec![0, -2, 1]).is_err());
        assert!(writer.add_sorted_set_ords(2, &keys, &[vec![0], vec![5], vec![]]).is_err());
        writer.add_sorted_ords(1, keys, vec![1, -1, 0]).unwrap();
        writer.finish().unwrap();
    }
}

//! The segment term dictionary (`.tis`).
//!
//! Entries are sorted by (field name, term bytes). Each entry is
//! `vint(field_number + 1)`, the term bytes prefix-compressed against the
//! previous entry of the same field, then the [`TermInfo`] with its file
//! pointers delta-encoded against the previous entry. A zero field marker,
//! the entry count and a checksum footer close the file.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{QuireError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::term::{Term, TermInfo};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageOutput};

const TERM_DICT_MAGIC: u32 = 0x5449_5331; // "TIS1"
const TERM_DICT_VERSION: u32 = 1;

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Streams sorted entries into a `.tis` file.
#[derive(Debug)]
pub struct TermDictWriter {
    out: StructWriter<Box<dyn StorageOutput>>,
    last_field: Option<(String, u32)>,
    last_bytes: Vec<u8>,
    last_info: TermInfo,
    count: u64,
}

impl TermDictWriter {
    pub fn new(storage: &Arc<dyn Storage>, file_name: &str, skip_interval: u32) -> Result<Self> {
        let mut out = StructWriter::new(storage.create_output(file_name)?);
        out.write_header(TERM_DICT_MAGIC, TERM_DICT_VERSION)?;
        out.write_u32(skip_interval)?;
        Ok(TermDictWriter {
            out,
            last_field: None,
            last_bytes: Vec::new(),
            last_info: TermInfo::default(),
            count: 0,
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn add(
        &mut self,
        field_name: &str,
        field_number: u32,
        bytes: &[u8],
        info: &TermInfo,
    ) -> Result<()> {
        let same_field = match &self.last_field {
            Some((last_name, _)) => {
                let order = last_name
                    .as_str()
                    .cmp(field_name)
                    .then_with(|| self.last_bytes.as_slice().cmp(bytes));
                if order != Ordering::Less {
                    return Err(QuireError::corruption(format!(
                        "terms out of order: {field_name}:{:?} after {last_name}:{:?}",
                        String::from_utf8_lossy(bytes),
                        String::from_utf8_lossy(&self.last_bytes)
                    )));
                }
                last_name == field_name
            }
            None => false,
        };
        if info.freq_pointer < self.last_info.freq_pointer
            || info.prox_pointer < self.last_info.prox_pointer
        {
            return Err(QuireError::corruption("postings pointers went backwards"));
        }

        let prefix = if same_field {
            shared_prefix(&self.last_bytes, bytes)
        } else {
            0
        };
        self.out.write_varint(field_number as u64 + 1)?;
        self.out.write_varint(prefix as u64)?;
        self.out.write_len_bytes(&bytes[prefix..])?;
        self.out.write_varint(info.doc_freq as u64)?;
        self.out
            .write_varint(info.freq_pointer - self.last_info.freq_pointer)?;
        self.out
            .write_varint(info.prox_pointer - self.last_info.prox_pointer)?;
        self.out.write_varint(info.skip_offset)?;
        self.out.write_varint(info.skip_length)?;

        if !same_field {
            self.last_field = Some((field_name.to_string(), field_number));
        }
        self.last_bytes.clear();
        self.last_bytes.extend_from_slice(bytes);
        self.last_info = *info;
        self.count += 1;
        Ok(())
    }

    pub fn close(mut self) -> Result<u64> {
        self.out.write_varint(0)?;
        self.out.write_varint(self.count)?;
        self.out.write_footer()?;
        self.out.close()?;
        Ok(self.count)
    }
}

/// One decoded dictionary entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermEntry {
    pub term: Term,
    pub field_number: u32,
    pub info: TermInfo,
}

/// A fully loaded term dictionary.
#[derive(Debug, Clone, Default)]
pub struct TermDictionary {
    entries: Vec<TermEntry>,
    skip_interval: u32,
}

impl TermDictionary {
    pub fn read(
        storage: &Arc<dyn Storage>,
        file_name: &str,
        field_infos: &FieldInfos,
    ) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(file_name)?)?;
        reader.check_footer()?;
        reader.seek(0)?;
        reader.check_header(TERM_DICT_MAGIC, TERM_DICT_VERSION, TERM_DICT_VERSION)?;
        let skip_interval = reader.read_u32()?;
        if skip_interval == 0 {
            return Err(QuireError::corruption(format!(
                "{file_name}: skip interval of 0"
            )));
        }

        let mut entries: Vec<TermEntry> = Vec::new();
        let mut last_info = TermInfo::default();
        loop {
            let marker = reader.read_varint_u32()?;
            if marker == 0 {
                break;
            }
            let field_number = marker - 1;
            let field = field_infos.by_number(field_number).ok_or_else(|| {
                QuireError::corruption(format!(
                    "{file_name}: unknown field number {field_number}"
                ))
            })?;
            let prefix = reader.read_varint()? as usize;
            let suffix = reader.read_len_bytes()?;

            let mut bytes = Vec::with_capacity(prefix + suffix.len());
            match entries.last() {
                Some(prev) if prev.field_number == field_number => {
                    if prefix > prev.term.bytes.len() {
                        return Err(QuireError::corruption(format!(
                            "{file_name}: prefix {prefix} longer than previous term"
                        )));
                    }
                    bytes.extend_from_slice(&prev.term.bytes[..prefix]);
                }
                _ if prefix != 0 => {
                    return Err(QuireError::corruption(format!(
                        "{file_name}: prefix {prefix} on first term of field"
                    )));
                }
                _ => {}
            }
            bytes.extend_from_slice(&suffix);

            let info = TermInfo {
                doc_freq: reader.read_varint_u32()?,
                freq_pointer: last_info.freq_pointer + reader.read_varint()?,
                prox_pointer: last_info.prox_pointer + reader.read_varint()?,
                skip_offset: reader.read_varint()?,
                skip_length: reader.read_varint()?,
            };
            if info.doc_freq == 0 {
                return Err(QuireError::corruption(format!(
                    "{file_name}: term with document frequency 0"
                )));
            }
            let term = Term::new(field.name.clone(), bytes);
            if let Some(prev) = entries.last() {
                if prev.term >= term {
                    return Err(QuireError::corruption(format!(
                        "{file_name}: terms out of order at {term:?}"
                    )));
                }
            }
            last_info = info;
            entries.push(TermEntry {
                term,
                field_number,
                info,
            });
        }

        let count = reader.read_varint()?;
        if count != entries.len() as u64 {
            return Err(QuireError::corruption(format!(
                "{file_name}: trailer says {count} terms, read {}",
                entries.len()
            )));
        }
        Ok(TermDictionary {
            entries,
            skip_interval,
        })
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip_interval
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TermEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&TermEntry> {
        self.entries.get(index)
    }

    pub fn get(&self, field: &str, bytes: &[u8]) -> Option<&TermInfo> {
        self.entries
            .binary_search_by(|entry| entry.term.cmp_parts(field, bytes))
            .ok()
            .map(|index| &self.entries[index].info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn info(doc_freq: u32, freq_pointer: u64, prox_pointer: u64) -> TermInfo {
        TermInfo {
            doc_freq,
            freq_pointer,
            prox_pointer,
            skip_offset: 3,
            skip_length: 0,
        }
    }

    fn field_infos() -> FieldInfos {
        let mut infos = FieldInfos::new();
        infos.add_or_update("title", true, false, false, None).unwrap();
        infos.add_or_update("body", true, false, false, None).unwrap();
        infos
    }

    #[test]
    fn test_write_read() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut writer = TermDictWriter::new(&storage, "_0.tis", 16).unwrap();
        writer.add("body", 1, b"apple", &info(2, 8, 8)).unwrap();
        writer.add("body", 1, b"applet", &info(1, 20, 12)).unwrap();
        writer.add("body", 1, b"banana", &info(5, 30, 13)).unwrap();
        writer.add("title", 0, b"apple", &info(1, 45, 30)).unwrap();
        assert_eq!(writer.close().unwrap(), 4);

        let dict = TermDictionary::read(&storage, "_0.tis", &field_infos()).unwrap();
        assert_eq!(dict.len(), 4);
        assert_eq!(dict.skip_interval(), 16);
        assert_eq!(dict.get("body", b"applet"), Some(&info(1, 20, 12)));
        assert_eq!(dict.get("title", b"apple"), Some(&info(1, 45, 30)));
        assert_eq!(dict.get("title", b"banana"), None);
        assert_eq!(dict.entry(3).unwrap().field_number, 0);
        assert_eq!(dict.entry(2).unwrap().term, Term::text("body", "banana"));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut writer = TermDictWriter::new(&storage, "_0.tis", 16).unwrap();
        writer.add("title", 0, b"b", &info(1, 8, 8)).unwrap();
        let err = writer.add("body", 1, b"z", &info(1, 9, 9)).unwrap_err();
        assert!(err.is_corruption());
        let err = writer.add("title", 0, b"b", &info(1, 9, 9)).unwrap_err();
        assert!(err.is_corruption());
    }
}

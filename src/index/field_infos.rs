//! Per-segment field metadata (`.fnm`).

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const FIELD_INFOS_MAGIC: u32 = 0x464E_4D31; // "FNM1"
const FIELD_INFOS_VERSION: u32 = 1;

const FLAG_INDEXED: u8 = 0x01;
const FLAG_STORE_TERM_VECTORS: u8 = 0x02;
const FLAG_OMIT_NORMS: u8 = 0x04;

/// Columnar value kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocValuesType {
    Numeric,
    Binary,
    Sorted,
    SortedSet,
}

impl DocValuesType {
    fn to_byte(self) -> u8 {
        match self {
            DocValuesType::Numeric => 1,
            DocValuesType::Binary => 2,
            DocValuesType::Sorted => 3,
            DocValuesType::SortedSet => 4,
        }
    }

    fn from_byte(byte: u8) -> Result<Option<Self>> {
        match byte {
            0 => Ok(None),
            1 => Ok(Some(DocValuesType::Numeric)),
            2 => Ok(Some(DocValuesType::Binary)),
            3 => Ok(Some(DocValuesType::Sorted)),
            4 => Ok(Some(DocValuesType::SortedSet)),
            other => Err(QuireError::corruption(format!(
                "unknown doc values type byte {other}"
            ))),
        }
    }
}

/// Metadata for one field of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    pub indexed: bool,
    pub store_term_vectors: bool,
    pub omit_norms: bool,
    pub doc_values: Option<DocValuesType>,
}

impl FieldInfo {
    /// Whether the segment carries a norm byte per document for this field.
    pub fn has_norms(&self) -> bool {
        self.indexed && !self.omit_norms
    }
}

/// The ordered set of fields of a segment, addressable by name or number.
#[derive(Debug, Clone, Default)]
pub struct FieldInfos {
    by_number: Vec<FieldInfo>,
    by_name: AHashMap<String, u32>,
}

impl FieldInfos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldInfo> {
        self.by_number.iter()
    }

    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(number as usize)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name
            .get(name)
            .and_then(|&number| self.by_number(number))
    }

    pub fn number_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn has_vectors(&self) -> bool {
        self.by_number.iter().any(|fi| fi.store_term_vectors)
    }

    /// Register a field or widen an existing one.
    ///
    /// Flags are OR-ed together (once a field stores vectors or omits norms in
    /// any document, it does for the whole segment); a conflicting doc values
    /// type is rejected.
    pub fn add_or_update(
        &mut self,
        name: &str,
        indexed: bool,
        store_term_vectors: bool,
        omit_norms: bool,
        doc_values: Option<DocValuesType>,
    ) -> Result<u32> {
        if let Some(&number) = self.by_name.get(name) {
            let info = &mut self.by_number[number as usize];
            match (info.doc_values, doc_values) {
                (Some(existing), Some(requested)) if existing != requested => {
                    return Err(QuireError::invalid_argument(format!(
                        "field '{name}' has doc values type {existing:?}, cannot change to {requested:?}"
                    )));
                }
                (None, Some(requested)) => info.doc_values = Some(requested),
                _ => {}
            }
            info.indexed |= indexed;
            info.store_term_vectors |= store_term_vectors;
            info.omit_norms |= omit_norms;
            return Ok(number);
        }

        let number = self.by_number.len() as u32;
        self.by_number.push(FieldInfo {
            name: name.to_string(),
            number,
            indexed,
            store_term_vectors,
            omit_norms,
            doc_values,
        });
        self.by_name.insert(name.to_string(), number);
        Ok(number)
    }

    /// Merge another segment's fields into this set by name.
    pub fn add_all(&mut self, other: &FieldInfos) -> Result<()> {
        for info in other.iter() {
            self.add_or_update(
                &info.name,
                info.indexed,
                info.store_term_vectors,
                info.omit_norms,
                info.doc_values,
            )?;
        }
        Ok(())
    }

    pub fn write(&self, storage: &Arc<dyn Storage>, file_name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(file_name)?);
        writer.write_header(FIELD_INFOS_MAGIC, FIELD_INFOS_VERSION)?;
        writer.write_varint(self.by_number.len() as u64)?;
        for info in &self.by_number {
            writer.write_string(&info.name)?;
            let mut flags = 0u8;
            if info.indexed {
                flags |= FLAG_INDEXED;
            }
            if info.store_term_vectors {
                flags |= FLAG_STORE_TERM_VECTORS;
            }
            if info.omit_norms {
                flags |= FLAG_OMIT_NORMS;
            }
            writer.write_u8(flags)?;
            writer.write_u8(info.doc_values.map_or(0, DocValuesType::to_byte))?;
        }
        writer.write_footer()?;
        writer.close()
    }

    pub fn read(storage: &Arc<dyn Storage>, file_name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(file_name)?)?;
        reader.check_footer()?;
        reader.seek(0)?;
        reader.check_header(FIELD_INFOS_MAGIC, FIELD_INFOS_VERSION, FIELD_INFOS_VERSION)?;

        let count = reader.read_varint()? as usize;
        let mut infos = FieldInfos::new();
        for number in 0..count {
            let name = reader.read_string()?;
            let flags = reader.read_u8()?;
            let doc_values = DocValuesType::from_byte(reader.read_u8()?)?;
            if infos.by_name.contains_key(&name) {
                return Err(QuireError::corruption(format!(
                    "duplicate field name '{name}' in {file_name}"
                )));
            }
            infos.by_name.insert(name.clone(), number as u32);
            infos.by_number.push(FieldInfo {
                name,
                number: number as u32,
                indexed: flags & FLAG_INDEXED != 0,
                store_term_vectors: flags & FLAG_STORE_TERM_VECTORS != 0,
                omit_norms: flags & FLAG_OMIT_NORMS != 0,
                doc_values,
            });
        }
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_add_or_update_widens_flags() {
        let mut infos = FieldInfos::new();
        let body = infos.add_or_update("body", true, false, false, None).unwrap();
        let price = infos
            .add_or_update("price", false, false, true, Some(DocValuesType::Numeric))
            .unwrap();
        assert_eq!((body, price), (0, 1));

        let again = infos.add_or_update("body", true, true, false, None).unwrap();
        assert_eq!(again, 0);
        assert!(infos.by_name("body").unwrap().store_term_vectors);
        assert!(infos.has_vectors());
    }

    #[test]
    fn test_doc_values_conflict() {
        let mut infos = FieldInfos::new();
        infos
            .add_or_update("tag", false, false, true, Some(DocValuesType::Sorted))
            .unwrap();
        let err = infos
            .add_or_update("tag", false, false, true, Some(DocValuesType::Numeric))
            .unwrap_err();
        assert!(matches!(err, QuireError::InvalidArgument(_)));
    }

    #[test]
    fn test_write_read() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut infos = FieldInfos::new();
        infos.add_or_update("title", true, true, false, None).unwrap();
        infos
            .add_or_update("tags", false, false, true, Some(DocValuesType::SortedSet))
            .unwrap();
        infos.write(&storage, "_0.fnm").unwrap();

        let read = FieldInfos::read(&storage, "_0.fnm").unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read.by_name("title"), infos.by_name("title"));
        assert_eq!(
            read.by_number(1).unwrap().doc_values,
            Some(DocValuesType::SortedSet)
        );
        assert!(read.by_name("title").unwrap().has_norms());
    }
}

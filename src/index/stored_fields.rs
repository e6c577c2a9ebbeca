//! Stored field values (`.fdx` index + `.fdt` data).
//!
//! `.fdx` is a header followed by one u64 `.fdt` pointer per document, so a
//! document's record is found with a single seek.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::{Storage, StorageInput, StorageOutput};

const STORED_INDEX_MAGIC: u32 = 0x4644_5831; // "FDX1"
const STORED_DATA_MAGIC: u32 = 0x4644_5431; // "FDT1"
const STORED_VERSION: u32 = 1;
const HEADER_LENGTH: u64 = 8;

const TYPE_TEXT: u8 = 0;
const TYPE_BYTES: u8 = 1;
const TYPE_INT: u8 = 2;
const TYPE_FLOAT: u8 = 3;

/// A value kept verbatim for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
}

/// The stored fields of one document, as (field number, value) pairs.
pub type StoredDocument = Vec<(u32, StoredValue)>;

/// Appends documents to a segment's stored-field files.
#[derive(Debug)]
pub struct StoredFieldsWriter {
    index: StructWriter<Box<dyn StorageOutput>>,
    data: StructWriter<Box<dyn StorageOutput>>,
    num_docs: u32,
}

impl StoredFieldsWriter {
    pub fn new(storage: &Arc<dyn Storage>, index_file: &str, data_file: &str) -> Result<Self> {
        let mut index = StructWriter::new(storage.create_output(index_file)?);
        index.write_header(STORED_INDEX_MAGIC, STORED_VERSION)?;
        let mut data = StructWriter::new(storage.create_output(data_file)?);
        data.write_header(STORED_DATA_MAGIC, STORED_VERSION)?;
        Ok(StoredFieldsWriter {
            index,
            data,
            num_docs: 0,
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn add_document(&mut self, fields: &[(u32, StoredValue)]) -> Result<()> {
        self.index.write_u64(self.data.position())?;
        self.data.write_varint(fields.len() as u64)?;
        for (number, value) in fields {
            self.data.write_varint(*number as u64)?;
            match value {
                StoredValue::Text(text) => {
                    self.data.write_u8(TYPE_TEXT)?;
                    self.data.write_string(text)?;
                }
                StoredValue::Bytes(bytes) => {
                    self.data.write_u8(TYPE_BYTES)?;
                    self.data.write_len_bytes(bytes)?;
                }
                StoredValue::Int(value) => {
                    self.data.write_u8(TYPE_INT)?;
                    self.data.write_zigzag(*value)?;
                }
                StoredValue::Float(value) => {
                    self.data.write_u8(TYPE_FLOAT)?;
                    self.data.write_f64(*value)?;
                }
            }
        }
        self.num_docs += 1;
        Ok(())
    }

    /// Close both files, checking that exactly `expected_docs` were added.
    pub fn finish(mut self, expected_docs: u32) -> Result<()> {
        if self.num_docs != expected_docs {
            return Err(QuireError::corruption(format!(
                "stored fields hold {} documents, segment has {expected_docs}",
                self.num_docs
            )));
        }
        let expected_len = HEADER_LENGTH + 8 * expected_docs as u64;
        if self.index.position() != expected_len {
            return Err(QuireError::corruption(format!(
                "fdx length {} != {expected_len}",
                self.index.position()
            )));
        }
        self.index.close()?;
        self.data.close()
    }
}

/// Random access to a segment's stored documents.
#[derive(Debug)]
pub struct StoredFieldsReader {
    pointers: Vec<u64>,
    data: Mutex<StructReader<Box<dyn StorageInput>>>,
}

impl StoredFieldsReader {
    pub fn open(
        storage: &Arc<dyn Storage>,
        index_file: &str,
        data_file: &str,
        num_docs: u32,
    ) -> Result<Self> {
        let mut index = StructReader::new(storage.open_input(index_file)?)?;
        index.check_header(STORED_INDEX_MAGIC, STORED_VERSION, STORED_VERSION)?;
        let expected_len = HEADER_LENGTH + 8 * num_docs as u64;
        if index.size() != expected_len {
            return Err(QuireError::corruption(format!(
                "{index_file}: length {} != {expected_len} for {num_docs} documents",
                index.size()
            )));
        }
        let pointers = (0..num_docs)
            .map(|_| index.read_u64())
            .collect::<Result<Vec<_>>>()?;

        let mut data = StructReader::new(storage.open_input(data_file)?)?;
        data.check_header(STORED_DATA_MAGIC, STORED_VERSION, STORED_VERSION)?;
        Ok(StoredFieldsReader {
            pointers,
            data: Mutex::new(data),
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.pointers.len() as u32
    }

    pub fn document(&self, doc: u32) -> Result<StoredDocument> {
        let pointer = *self.pointers.get(doc as usize).ok_or_else(|| {
            QuireError::invalid_argument(format!(
                "document {doc} out of range ({} documents)",
                self.pointers.len()
            ))
        })?;
        let mut data = self.data.lock();
        data.seek(pointer)?;
        let count = data.read_varint()? as usize;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let number = data.read_varint_u32()?;
            let value = match data.read_u8()? {
                TYPE_TEXT => StoredValue::Text(data.read_string()?),
                TYPE_BYTES => StoredValue::Bytes(data.read_len_bytes()?),
                TYPE_INT => StoredValue::Int(data.read_zigzag()?),
                TYPE_FLOAT => StoredValue::Float(data.read_f64()?),
                other => {
                    return Err(QuireError::corruption(format!(
                        "unknown stored value type {other}"
                    )));
                }
            };
            fields.push((number, value));
        }
        Ok(fields)
    }
}

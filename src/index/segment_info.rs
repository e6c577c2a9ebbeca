//! Segment-level metadata (`.si`), persisted as JSON.

use std::io::{Read, Write};
use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};
use crate::storage::Storage;

pub const FIELD_INFOS_EXTENSION: &str = "fnm";
pub const STORED_INDEX_EXTENSION: &str = "fdx";
pub const STORED_DATA_EXTENSION: &str = "fdt";
pub const TERM_DICT_EXTENSION: &str = "tis";
pub const FREQ_EXTENSION: &str = "frq";
pub const PROX_EXTENSION: &str = "prx";
pub const NORMS_EXTENSION: &str = "nrm";
pub const DOC_VALUES_META_EXTENSION: &str = "dvm";
pub const DOC_VALUES_DATA_EXTENSION: &str = "dvd";
pub const VECTORS_INDEX_EXTENSION: &str = "tvx";
pub const VECTORS_DOCUMENTS_EXTENSION: &str = "tvd";
pub const VECTORS_FIELDS_EXTENSION: &str = "tvf";
pub const DELETES_EXTENSION: &str = "del";
pub const SEGMENT_INFO_EXTENSION: &str = "si";

/// `<segment>.<ext>`
pub fn segment_file_name(segment: &str, extension: &str) -> String {
    format!("{segment}.{extension}")
}

/// Metadata describing one immutable segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Segment name, the prefix of all its files.
    pub name: String,

    /// Number of document ids, deleted ones included.
    pub doc_count: u32,

    /// Files belonging to this segment, `.si` excluded.
    pub files: Vec<String>,

    /// Whether term vector files exist.
    pub has_vectors: bool,

    /// Deletion generation; `None` when the segment has no `.del` file.
    #[serde(default)]
    pub del_gen: Option<u64>,
}

impl SegmentInfo {
    pub fn new(name: impl Into<String>, doc_count: u32) -> Self {
        SegmentInfo {
            name: name.into(),
            doc_count,
            files: Vec::new(),
            has_vectors: false,
            del_gen: None,
        }
    }

    pub fn file_name(&self, extension: &str) -> String {
        segment_file_name(&self.name, extension)
    }

    /// Name of the deletions file for the current generation.
    pub fn deletes_file_name(&self) -> Option<String> {
        self.del_gen
            .map(|generation| format!("{}_{generation}.{DELETES_EXTENSION}", self.name))
    }

    pub fn add_file(&mut self, file: String) {
        if !self.files.contains(&file) {
            self.files.push(file);
        }
    }

    pub fn write(&self, storage: &Arc<dyn Storage>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut output = storage.create_output(&self.file_name(SEGMENT_INFO_EXTENSION))?;
        output.write_all(&json)?;
        output.close()
    }

    /// Delete the listed files and the `.si`, skipping missing ones.
    ///
    /// Used to discard a segment whose flush or merge failed, so errors are
    /// logged rather than returned.
    pub fn discard(&self, storage: &Arc<dyn Storage>) {
        let si = self.file_name(SEGMENT_INFO_EXTENSION);
        for file in self.files.iter().chain(std::iter::once(&si)) {
            if !storage.file_exists(file) {
                continue;
            }
            if let Err(err) = storage.delete_file(file) {
                warn!("ignoring error deleting {file} of discarded segment: {err}");
            }
        }
    }

    pub fn read(storage: &Arc<dyn Storage>, name: &str) -> Result<Self> {
        let file_name = segment_file_name(name, SEGMENT_INFO_EXTENSION);
        if !storage.file_exists(&file_name) {
            return Err(QuireError::not_found(format!("segment info {file_name}")));
        }
        let mut input = storage.open_input(&file_name)?;
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let info: SegmentInfo = serde_json::from_slice(&bytes)?;
        if info.name != name {
            return Err(QuireError::corruption(format!(
                "{file_name} describes segment '{}'",
                info.name
            )));
        }
        Ok(info)
    }
}

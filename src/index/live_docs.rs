//! Deleted-document bitmaps (`.del`) and the old-to-new doc id mapping used
//! by merges.

use std::sync::Arc;

use bit_vec::BitVec;

use crate::error::{QuireError, Result};
use crate::storage::Storage;
use crate::storage::structured::{StructReader, StructWriter};

const LIVE_DOCS_MAGIC: u32 = 0x4445_4C42; // "DELB"
const LIVE_DOCS_VERSION: u32 = 1;

/// Deletion bitmap of one segment. A set bit marks a deleted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDocs {
    deleted: BitVec,
    deleted_count: u32,
}

impl LiveDocs {
    /// All `max_doc` documents live.
    pub fn new(max_doc: u32) -> Self {
        LiveDocs {
            deleted: BitVec::from_elem(max_doc as usize, false),
            deleted_count: 0,
        }
    }

    /// Number of doc ids covered, live or not.
    pub fn max_doc(&self) -> u32 {
        self.deleted.len() as u32
    }

    pub fn deleted_count(&self) -> u32 {
        self.deleted_count
    }

    pub fn live_count(&self) -> u32 {
        self.max_doc() - self.deleted_count
    }

    pub fn has_deletions(&self) -> bool {
        self.deleted_count > 0
    }

    pub fn is_live(&self, doc: u32) -> bool {
        !self.deleted.get(doc as usize).unwrap_or(true)
    }

    /// Mark `doc` deleted. Returns false if it already was.
    pub fn delete(&mut self, doc: u32) -> Result<bool> {
        if doc >= self.max_doc() {
            return Err(QuireError::index(format!(
                "document {doc} is out of range for segment with {} documents",
                self.max_doc()
            )));
        }
        if self.deleted[doc as usize] {
            return Ok(false);
        }
        self.deleted.set(doc as usize, true);
        self.deleted_count += 1;
        Ok(true)
    }

    /// Grow to cover `max_doc` ids; new ids are live.
    pub fn grow(&mut self, max_doc: u32) {
        let current = self.deleted.len();
        if (max_doc as usize) > current {
            self.deleted.grow(max_doc as usize - current, false);
        }
    }

    pub fn write(&self, storage: &Arc<dyn Storage>, file_name: &str) -> Result<()> {
        let mut writer = StructWriter::new(storage.create_output(file_name)?);
        writer.write_header(LIVE_DOCS_MAGIC, LIVE_DOCS_VERSION)?;
        writer.write_varint(self.max_doc() as u64)?;
        writer.write_varint(self.deleted_count as u64)?;
        writer.write_len_bytes(&self.deleted.to_bytes())?;
        writer.write_footer()?;
        writer.close()
    }

    pub fn read(storage: &Arc<dyn Storage>, file_name: &str) -> Result<Self> {
        let mut reader = StructReader::new(storage.open_input(file_name)?)?;
        reader.check_footer()?;
        reader.seek(0)?;
        reader.check_header(LIVE_DOCS_MAGIC, LIVE_DOCS_VERSION, LIVE_DOCS_VERSION)?;

        let max_doc = reader.read_varint_u32()?;
        let deleted_count = reader.read_varint_u32()?;
        let bytes = reader.read_len_bytes()?;
        if (bytes.len() as u64) * 8 < max_doc as u64 {
            return Err(QuireError::corruption(format!(
                "{file_name}: bitmap of {} bytes cannot cover {max_doc} documents",
                bytes.len()
            )));
        }
        let mut deleted = BitVec::from_bytes(&bytes);
        deleted.truncate(max_doc as usize);

        let counted = deleted.iter().filter(|bit| *bit).count() as u32;
        if counted != deleted_count {
            return Err(QuireError::corruption(format!(
                "{file_name}: header says {deleted_count} deletions, bitmap has {counted}"
            )));
        }
        Ok(LiveDocs {
            deleted,
            deleted_count,
        })
    }
}

/// Maps a source segment's doc ids onto the contiguous, deletion-free id
/// space of a merged segment.
#[derive(Debug, Clone)]
pub struct DocMap {
    mapping: Option<Vec<Option<u32>>>,
    max_doc: u32,
    live_count: u32,
}

impl DocMap {
    /// Build the map for a segment of `max_doc` documents.
    pub fn new(max_doc: u32, live_docs: Option<&LiveDocs>) -> Self {
        match live_docs.filter(|live| live.has_deletions()) {
            None => DocMap {
                mapping: None,
                max_doc,
                live_count: max_doc,
            },
            Some(live) => {
                let mut next = 0u32;
                let mapping = (0..max_doc)
                    .map(|doc| {
                        if live.is_live(doc) {
                            next += 1;
                            Some(next - 1)
                        } else {
                            None
                        }
                    })
                    .collect();
                DocMap {
                    mapping: Some(mapping),
                    max_doc,
                    live_count: next,
                }
            }
        }
    }

    /// New id of `doc` within this segment's share of the merged space, or
    /// `None` if it was deleted.
    pub fn get(&self, doc: u32) -> Option<u32> {
        if doc >= self.max_doc {
            return None;
        }
        match &self.mapping {
            None => Some(doc),
            Some(mapping) => mapping[doc as usize],
        }
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    /// Number of documents that survive the merge.
    pub fn live_count(&self) -> u32 {
        self.live_count
    }

    pub fn has_deletions(&self) -> bool {
        self.mapping.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete_and_counts() {
        let mut live = LiveDocs::new(5);
        assert!(live.delete(2).unwrap());
        assert!(!live.delete(2).unwrap());
        assert!(live.delete(7).is_err());
        assert_eq!(live.live_count(), 4);
        assert!(!live.is_live(2));
        assert!(live.is_live(4));
        assert!(!live.is_live(5));

        live.grow(8);
        assert_eq!(live.max_doc(), 8);
        assert!(live.is_live(7));
    }

    #[test]
    fn test_doc_map_skips_deleted() {
        let mut live = LiveDocs::new(6);
        live.delete(1).unwrap();
        live.delete(4).unwrap();
        let map = DocMap::new(6, Some(&live));
        let mapped: Vec<_> = (0..6).map(|d| map.get(d)).collect();
        assert_eq!(
            mapped,
            vec![Some(0), None, Some(1), Some(2), None, Some(3)]
        );
        assert_eq!(map.live_count(), 4);
    }

    #[test]
    fn test_doc_map_without_deletions_is_identity() {
        let map = DocMap::new(3, Some(&LiveDocs::new(3)));
        assert!(!map.has_deletions());
        assert_eq!(map.get(2), Some(2));
        assert_eq!(map.get(3), None);
    }

    #[test]
    fn test_write_read() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut live = LiveDocs::new(13);
        live.delete(0).unwrap();
        live.delete(12).unwrap();
        live.write(&storage, "_0_1.del").unwrap();

        let read = LiveDocs::read(&storage, "_0_1.del").unwrap();
        assert_eq!(read, live);
    }
}

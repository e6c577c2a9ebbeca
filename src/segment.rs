//! Building, opening and deleting from immutable segments.

pub mod builder;
pub mod document;
pub mod reader;

use std::sync::Arc;

use log::{debug, warn};

pub use builder::SegmentBuilder;
pub use document::{DocValue, IndexDocument, IndexedField, Token};
pub use reader::SegmentReader;

use crate::error::Result;
use crate::index::live_docs::LiveDocs;
use crate::index::segment_info::SegmentInfo;
use crate::storage::Storage;

/// Mark `docs` deleted in segment `name`.
///
/// The bitmap is written under the next deletion generation and the `.si`
/// rewritten to point at it; the previous generation's file is removed.
/// Returns the number of documents newly deleted.
pub fn delete_documents(storage: &Arc<dyn Storage>, name: &str, docs: &[u32]) -> Result<u32> {
    let mut info = SegmentInfo::read(storage, name)?;
    let previous = info.deletes_file_name();
    let mut live_docs = match &previous {
        Some(file) => LiveDocs::read(storage, file)?,
        None => LiveDocs::new(info.doc_count),
    };

    let mut deleted = 0;
    for &doc in docs {
        if live_docs.delete(doc)? {
            deleted += 1;
        }
    }
    if deleted == 0 {
        return Ok(0);
    }

    info.del_gen = Some(info.del_gen.map_or(1, |generation| generation + 1));
    if let Some(file) = info.deletes_file_name() {
        live_docs.write(storage, &file)?;
        if let Some(stale) = &previous {
            info.files.retain(|existing| existing != stale);
        }
        info.add_file(file);
    }
    info.write(storage)?;
    if let Some(file) = previous {
        if let Err(err) = storage.delete_file(&file) {
            warn!("failed to remove stale deletions file {file}: {err}");
        }
    }
    debug!(
        "segment {name}: {deleted} documents deleted, generation {:?}",
        info.del_gen
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodecConfig;
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_delete_documents_bumps_generation() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut builder = SegmentBuilder::new(storage.clone(), "_0", CodecConfig::default()).unwrap();
        for word in ["a", "b", "c"] {
            builder
                .add_document(IndexDocument::new().with_text("body", [word]))
                .unwrap();
        }
        builder.flush().unwrap();

        assert_eq!(delete_documents(&storage, "_0", &[1]).unwrap(), 1);
        assert_eq!(delete_documents(&storage, "_0", &[1, 2]).unwrap(), 1);
        assert_eq!(delete_documents(&storage, "_0", &[2]).unwrap(), 0);
        assert!(delete_documents(&storage, "_0", &[9]).is_err());

        let reader = SegmentReader::open(&storage, "_0").unwrap();
        assert_eq!(reader.info().del_gen, Some(2));
        assert_eq!(reader.num_docs(), 1);
        assert!(!storage.file_exists("_0_1.del"));
        assert!(storage.file_exists("_0_2.del"));
        assert!(reader.info().files.contains(&"_0_2.del".to_string()));
        assert!(!reader.info().files.contains(&"_0_1.del".to_string()));
    }
}

//! Read access to a flushed or merged segment.

use std::sync::Arc;

use log::debug;

use crate::doc_values::DocValuesReader;
use crate::error::Result;
use crate::index::field_infos::FieldInfos;
use crate::index::live_docs::{DocMap, LiveDocs};
use crate::index::norms::NormsReader;
use crate::index::segment_info::{
    DOC_VALUES_DATA_EXTENSION, DOC_VALUES_META_EXTENSION, FIELD_INFOS_EXTENSION,
    FREQ_EXTENSION, NORMS_EXTENSION, PROX_EXTENSION, STORED_DATA_EXTENSION,
    STORED_INDEX_EXTENSION, SegmentInfo, TERM_DICT_EXTENSION,
};
use crate::index::stored_fields::StoredFieldsReader;
use crate::postings::{PostingsReader, TermDictionary};
use crate::storage::Storage;
use crate::term_vectors::TermVectorsReader;

/// Every decoded structure of one segment, as consumed by a merge.
#[derive(Debug)]
pub struct SegmentReader {
    info: SegmentInfo,
    field_infos: FieldInfos,
    terms: TermDictionary,
    postings: PostingsReader,
    stored: StoredFieldsReader,
    norms: NormsReader,
    doc_values: Option<DocValuesReader>,
    term_vectors: Option<TermVectorsReader>,
    live_docs: Option<LiveDocs>,
}

impl SegmentReader {
    pub fn open(storage: &Arc<dyn Storage>, name: &str) -> Result<Self> {
        let info = SegmentInfo::read(storage, name)?;
        let max_doc = info.doc_count;

        let field_infos = FieldInfos::read(storage, &info.file_name(FIELD_INFOS_EXTENSION))?;
        let terms = TermDictionary::read(
            storage,
            &info.file_name(TERM_DICT_EXTENSION),
            &field_infos,
        )?;
        let postings = PostingsReader::open(
            storage,
            &info.file_name(FREQ_EXTENSION),
            &info.file_name(PROX_EXTENSION),
            terms.skip_interval(),
        )?;
        let stored = StoredFieldsReader::open(
            storage,
            &info.file_name(STORED_INDEX_EXTENSION),
            &info.file_name(STORED_DATA_EXTENSION),
            max_doc,
        )?;
        let norms = NormsReader::open(storage, &info.file_name(NORMS_EXTENSION), max_doc)?;

        let dvm = info.file_name(DOC_VALUES_META_EXTENSION);
        let doc_values = if info.files.contains(&dvm) {
            Some(DocValuesReader::open(
                storage,
                &dvm,
                &info.file_name(DOC_VALUES_DATA_EXTENSION),
                max_doc,
            )?)
        } else {
            None
        };

        let term_vectors = if info.has_vectors {
            TermVectorsReader::open(storage, name, max_doc)?
        } else {
            None
        };

        let live_docs = match info.deletes_file_name() {
            Some(file) => Some(LiveDocs::read(storage, &file)?),
            None => None,
        };

        debug!(
            "opened segment {name}: {max_doc} documents, {} terms",
            terms.len()
        );
        Ok(SegmentReader {
            info,
            field_infos,
            terms,
            postings,
            stored,
            norms,
            doc_values,
            term_vectors,
            live_docs,
        })
    }

    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Number of doc ids, deleted ones included.
    pub fn max_doc(&self) -> u32 {
        self.info.doc_count
    }

    /// Number of live documents.
    pub fn num_docs(&self) -> u32 {
        self.live_docs
            .as_ref()
            .map_or(self.info.doc_count, LiveDocs::live_count)
    }

    pub fn is_live(&self, doc: u32) -> bool {
        match &self.live_docs {
            Some(live_docs) => live_docs.is_live(doc),
            None => doc < self.info.doc_count,
        }
    }

    pub fn field_infos(&self) -> &FieldInfos {
        &self.field_infos
    }

    pub fn terms(&self) -> &TermDictionary {
        &self.terms
    }

    pub fn postings(&self) -> &PostingsReader {
        &self.postings
    }

    pub fn stored_fields(&self) -> &StoredFieldsReader {
        &self.stored
    }

    pub fn norms(&self) -> &NormsReader {
        &self.norms
    }

    pub fn doc_values(&self) -> Option<&DocValuesReader> {
        self.doc_values.as_ref()
    }

    pub fn term_vectors(&self) -> Option<&TermVectorsReader> {
        self.term_vectors.as_ref()
    }

    pub fn live_docs(&self) -> Option<&LiveDocs> {
        self.live_docs.as_ref()
    }

    /// Old-to-new id mapping for merging this segment.
    pub fn doc_map(&self) -> DocMap {
        DocMap::new(self.info.doc_count, self.live_docs.as_ref())
    }
}

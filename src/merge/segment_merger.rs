//! Combines several segments into one, dropping deleted documents.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::CodecConfig;
use crate::doc_values::DocValuesWriter;
use crate::error::{QuireError, Result};
use crate::index::field_infos::FieldInfos;
use crate::index::live_docs::DocMap;
use crate::index::norms::write_norms;
use crate::index::segment_info::{
    DOC_VALUES_DATA_EXTENSION, DOC_VALUES_META_EXTENSION, FIELD_INFOS_EXTENSION,
    FREQ_EXTENSION, NORMS_EXTENSION, PROX_EXTENSION, STORED_DATA_EXTENSION,
    STORED_INDEX_EXTENSION, SegmentInfo, TERM_DICT_EXTENSION,
};
use crate::index::stored_fields::StoredFieldsWriter;
use crate::merge::doc_values_merger::{DocValuesMerger, DocValuesSource};
use crate::merge::postings_merger::{PostingsMerger, PostingsSource};
use crate::merge::term_merger::TermMerger;
use crate::postings::{PostingsWriter, TermDictWriter};
use crate::segment::SegmentReader;
use crate::storage::Storage;
use crate::term_vectors::TermVectorsWriter;

/// Outcome of a merge.
#[derive(Debug, Clone)]
pub struct MergedSegment {
    pub info: SegmentInfo,
    /// First merged doc id of each input's live documents.
    pub doc_bases: Vec<u32>,
    /// Distinct terms written to the merged dictionary.
    pub term_count: u64,
}

/// Input-side state shared by the merge steps.
struct MergeState<'a> {
    readers: &'a [SegmentReader],
    doc_maps: Vec<DocMap>,
    doc_bases: Vec<u32>,
    field_infos: FieldInfos,
    merged_docs: u32,
}

impl MergeState<'_> {
    /// Merged number of the field that is `number` in input `segment`.
    fn merged_field(&self, segment: usize, number: u32) -> Result<u32> {
        self.readers[segment]
            .field_infos()
            .by_number(number)
            .and_then(|info| self.field_infos.number_of(&info.name))
            .ok_or_else(|| {
                QuireError::corruption(format!(
                    "field {number} of segment {} is not in the merged field infos",
                    self.readers[segment].name()
                ))
            })
    }

    fn live_docs(&self, segment: usize) -> impl Iterator<Item = u32> + '_ {
        let doc_map = &self.doc_maps[segment];
        (0..doc_map.max_doc()).filter(move |&doc| doc_map.get(doc).is_some())
    }
}

/// Merges segments into a new segment.
///
/// One merge runs at a time per merger; concurrent callers wait on the
/// merger's lock.
#[derive(Debug)]
pub struct SegmentMerger {
    storage: Arc<dyn Storage>,
    config: CodecConfig,
    merge_lock: Mutex<()>,
}

impl SegmentMerger {
    pub fn new(storage: Arc<dyn Storage>, config: CodecConfig) -> Result<Self> {
        config.validate()?;
        Ok(SegmentMerger {
            storage,
            config,
            merge_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Merge `readers`, in order, into the segment `name`.
    ///
    /// On failure every file written for `name` is removed and the first
    /// error is returned.
    pub fn merge(&self, readers: &[SegmentReader], name: &str) -> Result<MergedSegment> {
        let _guard = self.merge_lock.lock();
        if readers.is_empty() {
            return Err(QuireError::invalid_argument("nothing to merge"));
        }
        if readers.iter().any(|reader| reader.name() == name) {
            return Err(QuireError::invalid_argument(format!(
                "merged segment {name} would overwrite an input"
            )));
        }
        info!(
            "merging {} segments into {name}: {:?}",
            readers.len(),
            readers.iter().map(SegmentReader::name).collect::<Vec<_>>()
        );

        let state = self.prepare(readers)?;
        let mut info = SegmentInfo::new(name, state.merged_docs);
        match self.write_segment(&state, &mut info) {
            Ok(term_count) => {
                info!(
                    "merged segment {name}: {} documents, {term_count} terms",
                    state.merged_docs
                );
                Ok(MergedSegment {
                    info,
                    doc_bases: state.doc_bases,
                    term_count,
                })
            }
            Err(err) => {
                warn!("merge into {name} failed: {err}");
                info.discard(&self.storage);
                Err(err)
            }
        }
    }

    fn prepare<'a>(&self, readers: &'a [SegmentReader]) -> Result<MergeState<'a>> {
        let mut field_infos = FieldInfos::new();
        for reader in readers {
            field_infos.add_all(reader.field_infos())?;
        }

        let mut doc_maps = Vec::with_capacity(readers.len());
        let mut doc_bases = Vec::with_capacity(readers.len());
        let mut merged_docs = 0u32;
        for reader in readers {
            let doc_map = reader.doc_map();
            doc_bases.push(merged_docs);
            merged_docs = merged_docs
                .checked_add(doc_map.live_count())
                .ok_or_else(|| QuireError::invalid_argument("merged segment too large"))?;
            doc_maps.push(doc_map);
        }
        Ok(MergeState {
            readers,
            doc_maps,
            doc_bases,
            field_infos,
            merged_docs,
        })
    }

    fn write_segment(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<u64> {
        let fnm = info.file_name(FIELD_INFOS_EXTENSION);
        info.add_file(fnm.clone());
        state.field_infos.write(&self.storage, &fnm)?;

        let stored = self.merge_stored_fields(state, info)?;
        debug!("{}: merged {stored} stored documents", info.name);
        self.merge_term_vectors(state, info)?;
        let term_count = self.merge_terms(state, info)?;
        self.merge_norms(state, info)?;
        self.merge_doc_values(state, info)?;

        info.write(&self.storage)?;
        Ok(term_count)
    }

    fn merge_stored_fields(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<u32> {
        let fdx = info.file_name(STORED_INDEX_EXTENSION);
        let fdt = info.file_name(STORED_DATA_EXTENSION);
        info.add_file(fdx.clone());
        info.add_file(fdt.clone());
        let mut writer = StoredFieldsWriter::new(&self.storage, &fdx, &fdt)?;
        for (segment, reader) in state.readers.iter().enumerate() {
            for doc in state.live_docs(segment) {
                let fields = reader
                    .stored_fields()
                    .document(doc)?
                    .into_iter()
                    .map(|(number, value)| Ok((state.merged_field(segment, number)?, value)))
                    .collect::<Result<Vec<_>>>()?;
                writer.add_document(&fields)?;
            }
        }
        let written = writer.num_docs();
        writer.finish(state.merged_docs)?;
        Ok(written)
    }

    fn merge_term_vectors(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<()> {
        if !state
            .readers
            .iter()
            .any(|reader| reader.term_vectors().is_some())
        {
            return Ok(());
        }
        let writer = TermVectorsWriter::new(self.storage.clone(), &info.name, 0);
        for file in writer.file_names() {
            info.add_file(file);
        }
        if let Err(err) = self.copy_term_vectors(state, &writer) {
            writer.abort();
            return Err(err);
        }
        info.has_vectors = writer.close(state.merged_docs)?;
        if !info.has_vectors {
            info.files
                .retain(|file| !writer.file_names().contains(file));
        }
        Ok(())
    }

    fn copy_term_vectors(&self, state: &MergeState<'_>, writer: &TermVectorsWriter) -> Result<()> {
        for (segment, reader) in state.readers.iter().enumerate() {
            let Some(vectors) = reader.term_vectors() else {
                continue;
            };
            let doc_map = &state.doc_maps[segment];
            for doc in state.live_docs(segment) {
                let fields = vectors.get(doc)?;
                if fields.is_empty() {
                    continue;
                }
                let Some(mapped) = doc_map.get(doc) else {
                    continue;
                };
                let handle = writer.start_document(state.doc_bases[segment] + mapped);
                for (number, payload) in &fields {
                    let merged = state.merged_field(segment, *number);
                    let added = merged.and_then(|number| writer.add_field(handle, number, payload));
                    if let Err(err) = added {
                        writer.discard_document(handle)?;
                        return Err(err);
                    }
                }
                writer.finish_document(handle)?;
            }
        }
        Ok(())
    }

    fn merge_terms(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<u64> {
        let tis = info.file_name(TERM_DICT_EXTENSION);
        let frq = info.file_name(FREQ_EXTENSION);
        let prx = info.file_name(PROX_EXTENSION);
        for file in [&tis, &frq, &prx] {
            info.add_file(file.clone());
        }

        let skip_interval = self.config.skip_interval;
        let writer = PostingsWriter::new(&self.storage, &frq, &prx, skip_interval)?;
        let mut postings = PostingsMerger::new(writer);
        let mut dictionary = TermDictWriter::new(&self.storage, &tis, skip_interval)?;

        let sources: Vec<PostingsSource<'_>> = state
            .readers
            .iter()
            .zip(&state.doc_maps)
            .zip(&state.doc_bases)
            .map(|((reader, doc_map), &doc_base)| PostingsSource {
                postings: reader.postings(),
                doc_map,
                doc_base,
            })
            .collect();

        let mut dropped_terms = 0u64;
        for term in TermMerger::new(state.readers.iter().map(SegmentReader::terms)) {
            let field_number = state.field_infos.number_of(term.field).ok_or_else(|| {
                QuireError::corruption(format!("term in unknown field '{}'", term.field))
            })?;
            match postings.merge_term(&term, &sources)? {
                Some(term_info) => {
                    dictionary.add(term.field, field_number, term.bytes, &term_info)?;
                }
                None => dropped_terms += 1,
            }
        }
        debug!(
            "{}: {} postings written, {} dropped, {dropped_terms} terms without live documents",
            info.name,
            postings.docs_written(),
            postings.docs_dropped()
        );
        postings.close()?;
        dictionary.close()
    }

    fn merge_norms(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<()> {
        let nrm = info.file_name(NORMS_EXTENSION);
        info.add_file(nrm.clone());

        let mut rows = Vec::new();
        for field in state.field_infos.iter().filter(|field| field.has_norms()) {
            let mut row = Vec::with_capacity(state.merged_docs as usize);
            for (segment, reader) in state.readers.iter().enumerate() {
                let norms = reader
                    .field_infos()
                    .number_of(&field.name)
                    .and_then(|number| reader.norms().norms(number));
                for doc in state.live_docs(segment) {
                    let norm = norms.and_then(|norms| norms.get(doc as usize).copied());
                    row.push(norm.unwrap_or(self.config.default_norm));
                }
            }
            rows.push((field.number, row));
        }
        write_norms(&self.storage, &nrm, state.merged_docs, &rows)
    }

    fn merge_doc_values(&self, state: &MergeState<'_>, info: &mut SegmentInfo) -> Result<()> {
        let fields: Vec<_> = state
            .field_infos
            .iter()
            .filter_map(|field| field.doc_values.map(|kind| (field, kind)))
            .collect();
        if fields.is_empty() {
            return Ok(());
        }
        let dvm = info.file_name(DOC_VALUES_META_EXTENSION);
        let dvd = info.file_name(DOC_VALUES_DATA_EXTENSION);
        info.add_file(dvm.clone());
        info.add_file(dvd.clone());
        let mut writer = DocValuesWriter::new(
            &self.storage,
            &dvm,
            &dvd,
            state.merged_docs,
            self.config.clone(),
        )?;

        for (field, kind) in fields {
            let sources: Vec<DocValuesSource<'_>> = state
                .readers
                .iter()
                .zip(&state.doc_maps)
                .map(|(reader, doc_map)| DocValuesSource {
                    doc_values: reader.doc_values(),
                    field: reader.field_infos().number_of(&field.name),
                    doc_map,
                })
                .collect();
            DocValuesMerger::new(&sources).merge_field(&mut writer, field.number, kind)?;
        }
        writer.finish()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{IndexDocument, SegmentBuilder};
    use crate::storage::memory::MemoryStorage;

    #[test]
    fn test_rejects_empty_input_and_self_overwrite() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut builder = SegmentBuilder::new(storage.clone(), "_0", CodecConfig::default()).unwrap();
        builder
            .add_document(IndexDocument::new().with_text("body", ["a"]))
            .unwrap();
        builder.flush().unwrap();
        let readers = vec![SegmentReader::open(&storage, "_0").unwrap()];

        let merger = SegmentMerger::new(storage.clone(), CodecConfig::default()).unwrap();
        assert!(matches!(
            merger.merge(&[], "_1"),
            Err(QuireError::InvalidArgument(_))
        ));
        assert!(matches!(
            merger.merge(&readers, "_0"),
            Err(QuireError::InvalidArgument(_))
        ));
        assert!(storage.file_exists("_0.si"));
    }

    #[test]
    fn test_all_deleted_inputs_give_empty_segment() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let mut builder = SegmentBuilder::new(storage.clone(), "_0", CodecConfig::default()).unwrap();
        builder
            .add_document(IndexDocument::new().with_text("body", ["a", "b"]))
            .unwrap();
        builder.flush().unwrap();
        crate::segment::delete_documents(&storage, "_0", &[0]).unwrap();

        let readers = vec![SegmentReader::open(&storage, "_0").unwrap()];
        let merger = SegmentMerger::new(storage.clone(), CodecConfig::default()).unwrap();
        let merged = merger.merge(&readers, "_1").unwrap();
        assert_eq!(merged.info.doc_count, 0);
        assert_eq!(merged.term_count, 0);

        let reader = SegmentReader::open(&storage, "_1").unwrap();
        assert_eq!(reader.max_doc(), 0);
        assert!(reader.terms().is_empty());
    }
}

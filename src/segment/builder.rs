//! Flush path: accumulates pre-tokenized documents in memory and writes
//! them out as one immutable segment.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use log::{debug, info, warn};

use crate::config::CodecConfig;
use crate::doc_values::DocValuesWriter;
use crate::error::{QuireError, Result};
use crate::index::field_infos::{DocValuesType, FieldInfos};
use crate::index::live_docs::LiveDocs;
use crate::index::norms::{encode_norm, write_norms};
use crate::index::segment_info::{
    DOC_VALUES_DATA_EXTENSION, DOC_VALUES_META_EXTENSION, FIELD_INFOS_EXTENSION,
    FREQ_EXTENSION, NORMS_EXTENSION, PROX_EXTENSION, STORED_DATA_EXTENSION,
    STORED_INDEX_EXTENSION, SegmentInfo, TERM_DICT_EXTENSION,
};
use crate::index::stored_fields::{StoredDocument, StoredFieldsWriter};
use crate::postings::{PostingsWriter, TermDictWriter};
use crate::segment::document::{DocValue, IndexDocument, Token};
use crate::storage::Storage;
use crate::term_vectors::{TermVectorField, TermVectorsWriter};

/// Postings of one term: (doc, sorted positions) in doc order.
type TermPostings = Vec<(u32, Vec<u32>)>;

/// Builds a single segment from documents added in doc id order.
#[derive(Debug)]
pub struct SegmentBuilder {
    storage: Arc<dyn Storage>,
    name: String,
    config: CodecConfig,
    field_infos: FieldInfos,
    /// field name -> term bytes -> postings; both levels sorted.
    postings: BTreeMap<String, BTreeMap<Vec<u8>, TermPostings>>,
    /// field number -> (doc, token count)
    lengths: AHashMap<u32, Vec<(u32, u32)>>,
    stored: Vec<StoredDocument>,
    doc_values: AHashMap<u32, Vec<(u32, DocValue)>>,
    vectors: TermVectorsWriter,
    live_docs: LiveDocs,
    next_doc: u32,
}

impl SegmentBuilder {
    pub fn new(storage: Arc<dyn Storage>, name: &str, config: CodecConfig) -> Result<Self> {
        config.validate()?;
        Ok(SegmentBuilder {
            vectors: TermVectorsWriter::new(storage.clone(), name, 0),
            storage,
            name: name.to_string(),
            config,
            field_infos: FieldInfos::new(),
            postings: BTreeMap::new(),
            lengths: AHashMap::new(),
            stored: Vec::new(),
            doc_values: AHashMap::new(),
            live_docs: LiveDocs::new(0),
            next_doc: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of doc ids assigned so far, rejected documents included.
    pub fn max_doc(&self) -> u32 {
        self.next_doc
    }

    pub fn field_infos(&self) -> &FieldInfos {
        &self.field_infos
    }

    /// Add the next document and return its id.
    ///
    /// A document that fails validation still consumes its id: it is
    /// recorded as deleted, gets no term vectors, and the validation error
    /// is returned.
    pub fn add_document(&mut self, doc: IndexDocument) -> Result<u32> {
        let doc_id = self.next_doc;
        self.next_doc = doc_id
            .checked_add(1)
            .ok_or_else(|| QuireError::invalid_state("segment is full"))?;
        self.live_docs.grow(self.next_doc);

        if let Err(err) = self.validate(&doc) {
            warn!("rejecting document {doc_id} of segment {}: {err}", self.name);
            self.live_docs.delete(doc_id)?;
            self.stored.push(Vec::new());
            return Err(err);
        }
        self.invert(doc_id, doc)?;
        Ok(doc_id)
    }

    fn validate(&self, doc: &IndexDocument) -> Result<()> {
        for field in &doc.indexed {
            if field.name.is_empty() {
                return Err(QuireError::invalid_argument("indexed field without a name"));
            }
            let mut last_position = 0u32;
            let mut last_start = 0u32;
            let with_offsets = field.tokens.first().is_some_and(|t| t.offsets.is_some());
            for token in &field.tokens {
                if token.term.is_empty() {
                    return Err(QuireError::invalid_argument(format!(
                        "empty token in field '{}'",
                        field.name
                    )));
                }
                if token.position < last_position {
                    return Err(QuireError::invalid_argument(format!(
                        "position {} after {last_position} in field '{}'",
                        token.position, field.name
                    )));
                }
                last_position = token.position;
                match token.offsets {
                    Some((start, end)) if with_offsets => {
                        if start < last_start || end < start {
                            return Err(QuireError::invalid_argument(format!(
                                "offsets ({start}, {end}) after start {last_start} in field '{}'",
                                field.name
                            )));
                        }
                        last_start = start;
                    }
                    None if !with_offsets => {}
                    _ => {
                        return Err(QuireError::invalid_argument(format!(
                            "field '{}' mixes tokens with and without offsets",
                            field.name
                        )));
                    }
                }
            }
        }
        if doc.stored.iter().any(|(name, _)| name.is_empty()) {
            return Err(QuireError::invalid_argument("stored field without a name"));
        }

        let mut seen = AHashSet::new();
        for (name, value) in &doc.doc_values {
            if !seen.insert(name.as_str()) {
                return Err(QuireError::invalid_argument(format!(
                    "doc values field '{name}' given twice"
                )));
            }
            let requested = value.doc_values_type();
            let existing = self
                .field_infos
                .by_name(name)
                .and_then(|info| info.doc_values);
            if let Some(existing) = existing {
                if existing != requested {
                    return Err(QuireError::invalid_argument(format!(
                        "field '{name}' has doc values type {existing:?}, got {requested:?}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn invert(&mut self, doc_id: u32, doc: IndexDocument) -> Result<()> {
        // Repeated fields of one document share a token stream; each later
        // instance continues after the previous one's last position and offset.
        let mut by_field: BTreeMap<u32, (String, Vec<Token>, bool)> = BTreeMap::new();
        for field in doc.indexed {
            let number = self.field_infos.add_or_update(
                &field.name,
                true,
                field.store_term_vectors,
                field.omit_norms,
                None,
            )?;
            let entry = by_field
                .entry(number)
                .or_insert_with(|| (field.name.clone(), Vec::new(), false));
            let position_base = entry
                .1
                .last()
                .map_or(0, |token| token.position.saturating_add(1));
            let offset_base = entry
                .1
                .iter()
                .filter_map(|token| token.offsets)
                .map(|(_, end)| end)
                .max()
                .unwrap_or(0);
            entry.1.extend(field.tokens.into_iter().map(|mut token| {
                token.position = token.position.saturating_add(position_base);
                if let Some((start, end)) = token.offsets {
                    token.offsets = Some((
                        start.saturating_add(offset_base),
                        end.saturating_add(offset_base),
                    ));
                }
                token
            }));
            entry.2 |= field.store_term_vectors;
        }

        let mut vector_fields = Vec::new();
        for (number, (name, tokens, with_vectors)) in by_field {
            self.lengths
                .entry(number)
                .or_default()
                .push((doc_id, tokens.len() as u32));

            let mut by_term: BTreeMap<&[u8], Vec<u32>> = BTreeMap::new();
            for token in &tokens {
                by_term
                    .entry(token.term.as_slice())
                    .or_default()
                    .push(token.position);
            }
            let terms = self.postings.entry(name).or_default();
            for (term, mut positions) in by_term {
                positions.sort_unstable();
                terms.entry(term.to_vec()).or_default().push((doc_id, positions));
            }

            if with_vectors {
                // Offsets are kept only when every instance of the field carries them.
                let offsets: Option<Vec<(u32, u32)>> =
                    tokens.iter().map(|token| token.offsets).collect();
                let field = match offsets {
                    Some(offsets) if !tokens.is_empty() => {
                        TermVectorField::from_tokens_with_offsets(
                            tokens
                                .iter()
                                .zip(offsets)
                                .map(|(token, offsets)| {
                                    (token.term.as_slice(), token.position, offsets)
                                }),
                            true,
                        )
                    }
                    _ => TermVectorField::from_tokens(
                        tokens.iter().map(|token| (token.term.as_slice(), token.position)),
                        true,
                    ),
                };
                vector_fields.push((number, field.encode()?));
            }
        }

        let mut stored = Vec::with_capacity(doc.stored.len());
        for (name, value) in doc.stored {
            let number = self.field_infos.add_or_update(&name, false, false, false, None)?;
            stored.push((number, value));
        }
        self.stored.push(stored);

        for (name, value) in doc.doc_values {
            let number = self.field_infos.add_or_update(
                &name,
                false,
                false,
                false,
                Some(value.doc_values_type()),
            )?;
            self.doc_values
                .entry(number)
                .or_default()
                .push((doc_id, value));
        }

        if !vector_fields.is_empty() {
            let handle = self.vectors.start_document(doc_id);
            for (number, payload) in &vector_fields {
                if let Err(err) = self.vectors.add_field(handle, *number, payload) {
                    self.vectors.discard_document(handle)?;
                    return Err(err);
                }
            }
            self.vectors.finish_document(handle)?;
        }
        Ok(())
    }

    /// Write every file of the segment and its `.si`.
    pub fn flush(self) -> Result<SegmentInfo> {
        let max_doc = self.next_doc;
        if max_doc == 0 {
            return Err(QuireError::invalid_state(format!(
                "segment {} has no documents",
                self.name
            )));
        }
        let mut info = SegmentInfo::new(self.name.clone(), max_doc);
        let written = self
            .write_files(&mut info)
            .and_then(|()| info.write(&self.storage));
        if let Err(err) = written {
            warn!("flush of segment {} failed: {err}", self.name);
            self.vectors.abort();
            for file in self.vectors.file_names() {
                info.add_file(file);
            }
            info.discard(&self.storage);
            return Err(err);
        }
        info!(
            "flushed segment {} ({max_doc} documents, {} deleted)",
            self.name,
            self.live_docs.deleted_count()
        );
        Ok(info)
    }

    fn write_files(&self, info: &mut SegmentInfo) -> Result<()> {
        let max_doc = info.doc_count;

        let fnm = info.file_name(FIELD_INFOS_EXTENSION);
        info.add_file(fnm.clone());
        self.field_infos.write(&self.storage, &fnm)?;

        let fdx = info.file_name(STORED_INDEX_EXTENSION);
        let fdt = info.file_name(STORED_DATA_EXTENSION);
        info.add_file(fdx.clone());
        info.add_file(fdt.clone());
        let mut stored = StoredFieldsWriter::new(&self.storage, &fdx, &fdt)?;
        for doc in &self.stored {
            stored.add_document(doc)?;
        }
        stored.finish(max_doc)?;

        self.write_postings(info)?;
        self.write_norms(info)?;
        self.write_doc_values(info)?;

        info.has_vectors = self.vectors.close(max_doc)?;
        if info.has_vectors {
            for file in self.vectors.file_names() {
                info.add_file(file);
            }
        }

        if self.live_docs.has_deletions() {
            info.del_gen = Some(1);
            if let Some(file) = info.deletes_file_name() {
                info.add_file(file.clone());
                self.live_docs.write(&self.storage, &file)?;
            }
        }
        Ok(())
    }

    fn write_postings(&self, info: &mut SegmentInfo) -> Result<()> {
        let tis = info.file_name(TERM_DICT_EXTENSION);
        let frq = info.file_name(FREQ_EXTENSION);
        let prx = info.file_name(PROX_EXTENSION);
        let mut postings =
            PostingsWriter::new(&self.storage, &frq, &prx, self.config.skip_interval)?;
        let mut dictionary = TermDictWriter::new(&self.storage, &tis, self.config.skip_interval)?;
        for file in [&tis, &frq, &prx] {
            info.add_file(file.clone());
        }

        for (field_name, terms) in &self.postings {
            let number = self.field_infos.number_of(field_name).ok_or_else(|| {
                QuireError::invalid_state(format!("postings for unknown field '{field_name}'"))
            })?;
            for (bytes, docs) in terms {
                postings.start_term()?;
                for (doc, positions) in docs {
                    postings.add_doc(*doc, positions)?;
                }
                if let Some(term_info) = postings.finish_term()? {
                    dictionary.add(field_name, number, bytes, &term_info)?;
                }
            }
        }
        postings.close()?;
        let terms = dictionary.close()?;
        debug!("segment {}: wrote {terms} terms", self.name);
        Ok(())
    }

    fn write_norms(&self, info: &mut SegmentInfo) -> Result<()> {
        let max_doc = info.doc_count;
        let mut rows = Vec::new();
        for field in self.field_infos.iter().filter(|field| field.has_norms()) {
            let mut row = vec![self.config.default_norm; max_doc as usize];
            if let Some(lengths) = self.lengths.get(&field.number) {
                for &(doc, length) in lengths {
                    row[doc as usize] = encode_norm(length);
                }
            }
            rows.push((field.number, row));
        }
        let nrm = info.file_name(NORMS_EXTENSION);
        info.add_file(nrm.clone());
        write_norms(&self.storage, &nrm, max_doc, &rows)
    }

    fn write_doc_values(&self, info: &mut SegmentInfo) -> Result<()> {
        if !self.field_infos.iter().any(|field| field.doc_values.is_some()) {
            return Ok(());
        }
        let max_doc = info.doc_count as usize;
        let dvm = info.file_name(DOC_VALUES_META_EXTENSION);
        let dvd = info.file_name(DOC_VALUES_DATA_EXTENSION);
        info.add_file(dvm.clone());
        info.add_file(dvd.clone());
        let mut writer = DocValuesWriter::new(
            &self.storage,
            &dvm,
            &dvd,
            info.doc_count,
            self.config.clone(),
        )?;

        for field in self.field_infos.iter() {
            let Some(doc_values_type) = field.doc_values else {
                continue;
            };
            let values = self
                .doc_values
                .get(&field.number)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            match doc_values_type {
                DocValuesType::Numeric => {
                    let mut column = vec![0i64; max_doc];
                    for (doc, value) in values {
                        if let DocValue::Numeric(number) = value {
                            column[*doc as usize] = *number;
                        }
                    }
                    writer.add_numeric(field.number, &column)?;
                }
                DocValuesType::Binary => {
                    let empty: &[u8] = &[];
                    let mut column = vec![empty; max_doc];
                    for (doc, value) in values {
                        if let DocValue::Binary(bytes) = value {
                            column[*doc as usize] = bytes.as_slice();
                        }
                    }
                    writer.add_binary(field.number, &column)?;
                }
                DocValuesType::Sorted => {
                    let mut column: Vec<Option<&[u8]>> = vec![None; max_doc];
                    for (doc, value) in values {
                        if let DocValue::Sorted(bytes) = value {
                            column[*doc as usize] = Some(bytes.as_slice());
                        }
                    }
                    writer.add_sorted(field.number, &column)?;
                }
                DocValuesType::SortedSet => {
                    let mut column: Vec<Vec<&[u8]>> = vec![Vec::new(); max_doc];
                    for (doc, value) in values {
                        if let DocValue::SortedSet(set) = value {
                            column[*doc as usize] = set.iter().map(Vec::as_slice).collect();
                        }
                    }
                    writer.add_sorted_set(field.number, &column)?;
                }
            }
        }
        writer.finish()
    }
}

//! Incremental term vector writer.
//!
//! Documents arrive one at a time from the indexing pipeline, each as a set
//! of `(field number, payload)` pairs accumulated in a pooled [`PerDoc`]
//! buffer. Flushing writes the document's entries to the three companion
//! files:
//!
//! ```text
//! tvx: u32 version, then per document u64 tvd pointer, u64 tvf pointer
//! tvd: u32 version, then per document vint(field count), the field
//!      numbers, and (count - 1) tvf pointer deltas
//! tvf: u32 version, then field payloads back to back
//! ```
//!
//! Every document id of the store gets exactly one entry: ids skipped
//! upstream are filled with zero-field records before the next flushed
//! document, and at close up to the store's document count.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::error::{QuireError, Result};
use crate::index::segment_info::{
    VECTORS_DOCUMENTS_EXTENSION, VECTORS_FIELDS_EXTENSION, VECTORS_INDEX_EXTENSION,
    segment_file_name,
};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};
use crate::term_vectors::{TVX_ENTRY_LENGTH, VECTORS_FORMAT_VERSION, VECTORS_HEADER_LENGTH};

/// Handle to a pooled per-document buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerDocHandle(usize);

/// Buffered term vector fields of one in-flight document.
#[derive(Debug, Default)]
struct PerDoc {
    doc_id: u32,
    field_numbers: Vec<u32>,
    field_pointers: Vec<u64>,
    buffer: Vec<u8>,
    in_use: bool,
}

impl PerDoc {
    fn reset(&mut self) {
        self.field_numbers.clear();
        self.field_pointers.clear();
        self.buffer.clear();
        self.in_use = false;
    }
}

#[derive(Debug)]
struct Streams {
    tvx: StructWriter<Box<dyn StorageOutput>>,
    tvd: StructWriter<Box<dyn StorageOutput>>,
    tvf: StructWriter<Box<dyn StorageOutput>>,
}

#[derive(Debug)]
struct WriterState {
    streams: Option<Streams>,
    /// Next store-global document id without an entry.
    next_doc: u32,
    arena: Vec<PerDoc>,
    free: Vec<usize>,
}

/// Writes the term vectors of one doc store.
#[derive(Debug)]
pub struct TermVectorsWriter {
    storage: Arc<dyn Storage>,
    store_segment: String,
    doc_store_offset: u32,
    state: Mutex<WriterState>,
}

impl TermVectorsWriter {
    /// Writer for the doc store named `store_segment`. Document ids passed
    /// in are segment-local and shifted by `doc_store_offset`.
    pub fn new(storage: Arc<dyn Storage>, store_segment: &str, doc_store_offset: u32) -> Self {
        TermVectorsWriter {
            storage,
            store_segment: store_segment.to_string(),
            doc_store_offset,
            state: Mutex::new(WriterState {
                streams: None,
                next_doc: 0,
                arena: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    pub fn file_names(&self) -> [String; 3] {
        [
            segment_file_name(&self.store_segment, VECTORS_INDEX_EXTENSION),
            segment_file_name(&self.store_segment, VECTORS_DOCUMENTS_EXTENSION),
            segment_file_name(&self.store_segment, VECTORS_FIELDS_EXTENSION),
        ]
    }

    /// Whether any document with vectors has been flushed.
    pub fn has_files(&self) -> bool {
        self.state.lock().streams.is_some()
    }

    /// Number of pooled buffers allocated since the last close.
    pub fn pool_size(&self) -> usize {
        self.state.lock().arena.len()
    }

    /// Take a buffer for segment-local document `doc_id`.
    pub fn start_document(&self, doc_id: u32) -> PerDocHandle {
        let mut state = self.state.lock();
        let index = match state.free.pop() {
            Some(index) => index,
            None => {
                state.arena.push(PerDoc::default());
                state.arena.len() - 1
            }
        };
        let per_doc = &mut state.arena[index];
        per_doc.doc_id = doc_id;
        per_doc.in_use = true;
        PerDocHandle(index)
    }

    /// Append one field's serialized vector payload.
    pub fn add_field(&self, handle: PerDocHandle, field_number: u32, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let per_doc = checked_per_doc(&mut state, handle)?;
        if per_doc.field_numbers.contains(&field_number) {
            return Err(QuireError::invalid_argument(format!(
                "field {field_number} added twice to document {}",
                per_doc.doc_id
            )));
        }
        per_doc.field_numbers.push(field_number);
        per_doc.field_pointers.push(per_doc.buffer.len() as u64);
        per_doc.buffer.extend_from_slice(payload);
        Ok(())
    }

    /// Release a buffer without writing it, e.g. after the document failed
    /// upstream. Its id will be filled with an empty record.
    pub fn discard_document(&self, handle: PerDocHandle) -> Result<()> {
        let mut state = self.state.lock();
        checked_per_doc(&mut state, handle)?.reset();
        state.free.push(handle.0);
        Ok(())
    }

    /// Write a buffered document and return its buffer to the pool.
    pub fn finish_document(&self, handle: PerDocHandle) -> Result<()> {
        let mut state = self.state.lock();
        let doc_id = checked_per_doc(&mut state, handle)?.doc_id;
        let result = self.write_document(&mut state, handle.0, doc_id);
        state.arena[handle.0].reset();
        state.free.push(handle.0);
        result
    }

    fn write_document(&self, state: &mut WriterState, index: usize, doc_id: u32) -> Result<()> {
        let doc = self.store_doc(doc_id)?;
        if doc < state.next_doc {
            return Err(QuireError::invalid_state(format!(
                "term vectors for document {doc} flushed after document {}",
                state.next_doc - 1
            )));
        }
        if state.arena[index].field_numbers.is_empty() {
            return Ok(());
        }
        self.ensure_streams(state)?;
        fill(state, doc)?;

        let WriterState {
            streams, arena, ..
        } = &mut *state;
        let (Some(streams), per_doc) = (streams.as_mut(), &arena[index]) else {
            return Err(QuireError::invalid_state("term vector streams not open"));
        };
        streams.tvx.write_u64(streams.tvd.position())?;
        streams.tvx.write_u64(streams.tvf.position())?;
        streams
            .tvd
            .write_varint(per_doc.field_numbers.len() as u64)?;
        for &number in &per_doc.field_numbers {
            streams.tvd.write_varint(number as u64)?;
        }
        for pair in per_doc.field_pointers.windows(2) {
            streams.tvd.write_varint(pair[1] - pair[0])?;
        }
        streams.tvf.write_bytes(&per_doc.buffer)?;
        state.next_doc = doc + 1;
        Ok(())
    }

    fn store_doc(&self, doc_id: u32) -> Result<u32> {
        self.doc_store_offset.checked_add(doc_id).ok_or_else(|| {
            QuireError::invalid_argument(format!("document id {doc_id} overflows the doc store"))
        })
    }

    fn ensure_streams(&self, state: &mut WriterState) -> Result<()> {
        if state.streams.is_some() {
            return Ok(());
        }
        let [tvx_name, tvd_name, tvf_name] = self.file_names();
        let open = |name: &str| -> Result<StructWriter<Box<dyn StorageOutput>>> {
            let mut writer = StructWriter::new(self.storage.create_output(name)?);
            writer.write_u32(VECTORS_FORMAT_VERSION)?;
            Ok(writer)
        };
        let streams = Streams {
            tvx: open(&tvx_name)?,
            tvd: open(&tvd_name)?,
            tvf: open(&tvf_name)?,
        };
        debug!("opened term vector files for {}", self.store_segment);
        state.streams = Some(streams);
        Ok(())
    }

    /// Fill up to `num_docs_in_store` and close the files, verifying the
    /// index length. Returns whether vector files were written.
    pub fn close(&self, num_docs_in_store: u32) -> Result<bool> {
        let mut state = self.state.lock();
        if state.arena.iter().any(|per_doc| per_doc.in_use) {
            return Err(QuireError::invalid_state(
                "term vectors writer closed with documents in flight",
            ));
        }
        if state.streams.is_none() {
            reset(&mut state);
            drain_pool(&mut state);
            return Ok(false);
        }
        let result = fill(&mut state, num_docs_in_store).and_then(|_| {
            let Some(mut streams) = state.streams.take() else {
                return Ok(());
            };
            streams.tvx.close()?;
            streams.tvd.close()?;
            streams.tvf.close()
        });
        if let Err(err) = result {
            self.abort_locked(&mut state);
            return Err(err);
        }
        reset(&mut state);
        drain_pool(&mut state);

        let tvx_name = segment_file_name(&self.store_segment, VECTORS_INDEX_EXTENSION);
        let actual = self.storage.file_size(&tvx_name)?;
        let expected = VECTORS_HEADER_LENGTH + TVX_ENTRY_LENGTH * num_docs_in_store as u64;
        if actual != expected {
            return Err(QuireError::corruption(format!(
                "{tvx_name} is {actual} bytes, expected {expected} for {num_docs_in_store} documents"
            )));
        }
        debug!(
            "closed term vectors for {} ({num_docs_in_store} documents)",
            self.store_segment
        );
        Ok(true)
    }

    /// Close whatever is open, ignoring secondary failures, and reset.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        self.abort_locked(&mut state);
    }

    fn abort_locked(&self, state: &mut WriterState) {
        if let Some(mut streams) = state.streams.take() {
            for (name, stream) in [
                ("tvx", &mut streams.tvx),
                ("tvd", &mut streams.tvd),
                ("tvf", &mut streams.tvf),
            ] {
                if let Err(err) = stream.close() {
                    warn!(
                        "ignoring error closing {name} of {} during abort: {err}",
                        self.store_segment
                    );
                }
            }
        }
        for per_doc in state.arena.iter_mut() {
            per_doc.reset();
        }
        state.free = (0..state.arena.len()).rev().collect();
        reset(state);
        debug!("aborted term vectors for {}", self.store_segment);
    }
}

fn checked_per_doc(state: &mut WriterState, handle: PerDocHandle) -> Result<&mut PerDoc> {
    match state.arena.get_mut(handle.0) {
        Some(per_doc) if per_doc.in_use => Ok(per_doc),
        _ => Err(QuireError::invalid_state(format!(
            "stale term vector buffer handle {}",
            handle.0
        ))),
    }
}

/// Write zero-field records for every id in `next_doc..doc`.
fn fill(state: &mut WriterState, doc: u32) -> Result<()> {
    let Some(streams) = state.streams.as_mut() else {
        return Ok(());
    };
    while state.next_doc < doc {
        streams.tvx.write_u64(streams.tvd.position())?;
        streams.tvx.write_u64(streams.tvf.position())?;
        streams.tvd.write_varint(0)?;
        state.next_doc += 1;
    }
    Ok(())
}

fn reset(state: &mut WriterState) {
    state.streams = None;
    state.next_doc = 0;
}

/// Drop every pooled buffer. Only valid when none is in use.
fn drain_pool(state: &mut WriterState) {
    state.arena.clear();
    state.free.clear();
}

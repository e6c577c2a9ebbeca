//! Appends postings to a segment's `.frq` and `.prx` streams.

use std::sync::Arc;

use log::trace;

use crate::error::{QuireError, Result};
use crate::index::term::TermInfo;
use crate::postings::skip::{SkipEntry, SkipListWriter};
use crate::storage::structured::StructWriter;
use crate::storage::{Storage, StorageOutput};

pub(crate) const FREQ_MAGIC: u32 = 0x4652_5131; // "FRQ1"
pub(crate) const PROX_MAGIC: u32 = 0x5052_5831; // "PRX1"
pub(crate) const POSTINGS_VERSION: u32 = 1;

#[derive(Debug)]
struct TermState {
    freq_start: u64,
    prox_start: u64,
    last_doc: Option<u32>,
    doc_freq: u32,
}

/// Writes one term's postings at a time.
///
/// Each document entry is `vint(docDelta << 1 | freq == 1)`, followed by
/// `vint(freq)` unless the low bit is set; its positions go to `.prx` as
/// `freq` varint deltas.
#[derive(Debug)]
pub struct PostingsWriter {
    freq: StructWriter<Box<dyn StorageOutput>>,
    prox: StructWriter<Box<dyn StorageOutput>>,
    skip: SkipListWriter,
    term: Option<TermState>,
}

impl PostingsWriter {
    pub fn new(
        storage: &Arc<dyn Storage>,
        freq_file: &str,
        prox_file: &str,
        skip_interval: u32,
    ) -> Result<Self> {
        if skip_interval == 0 {
            return Err(QuireError::invalid_config("skip_interval must be > 0"));
        }
        let mut freq = StructWriter::new(storage.create_output(freq_file)?);
        freq.write_header(FREQ_MAGIC, POSTINGS_VERSION)?;
        let mut prox = StructWriter::new(storage.create_output(prox_file)?);
        prox.write_header(PROX_MAGIC, POSTINGS_VERSION)?;
        Ok(PostingsWriter {
            freq,
            prox,
            skip: SkipListWriter::new(skip_interval),
            term: None,
        })
    }

    pub fn skip_interval(&self) -> u32 {
        self.skip.interval()
    }

    pub fn start_term(&mut self) -> Result<()> {
        if self.term.is_some() {
            return Err(QuireError::invalid_state(
                "start_term called while a term is open",
            ));
        }
        let freq_start = self.freq.position();
        let prox_start = self.prox.position();
        self.skip.reset(freq_start, prox_start);
        self.term = Some(TermState {
            freq_start,
            prox_start,
            last_doc: None,
            doc_freq: 0,
        });
        Ok(())
    }

    /// Append one document. A document without positions has frequency 0
    /// and is not written.
    pub fn add_doc(&mut self, doc: u32, positions: &[u32]) -> Result<()> {
        let term = self
            .term
            .as_mut()
            .ok_or_else(|| QuireError::invalid_state("add_doc called outside a term"))?;
        if positions.is_empty() {
            return Ok(());
        }
        let delta = match term.last_doc {
            Some(last) if doc <= last => {
                return Err(QuireError::corruption(format!(
                    "doc ids out of order: {doc} after {last}"
                )));
            }
            Some(last) => doc - last,
            None => doc,
        };

        let freq = positions.len() as u64;
        let code = (delta as u64) << 1;
        if freq == 1 {
            self.freq.write_varint(code | 1)?;
        } else {
            self.freq.write_varint(code)?;
            self.freq.write_varint(freq)?;
        }

        let mut last_position = 0u32;
        for &position in positions {
            if position < last_position {
                return Err(QuireError::corruption(format!(
                    "positions out of order in doc {doc}: {position} after {last_position}"
                )));
            }
            self.prox.write_varint((position - last_position) as u64)?;
            last_position = position;
        }

        term.last_doc = Some(doc);
        term.doc_freq += 1;
        if self.skip.should_checkpoint(term.doc_freq) {
            self.skip.add_checkpoint(SkipEntry {
                doc,
                freq_pointer: self.freq.position(),
                prox_pointer: self.prox.position(),
            });
        }
        Ok(())
    }

    /// Close the open term and write its skip trailer. Returns `None` if no
    /// document was written, in which case the term must be left out of the
    /// dictionary.
    pub fn finish_term(&mut self) -> Result<Option<TermInfo>> {
        let term = self
            .term
            .take()
            .ok_or_else(|| QuireError::invalid_state("finish_term called outside a term"))?;
        if term.doc_freq == 0 {
            return Ok(None);
        }
        let skip_offset = self.freq.position() - term.freq_start;
        let skip_length = self.skip.write_to(&mut self.freq)?;
        trace!(
            "term finished: df={} skip checkpoints={}",
            term.doc_freq,
            self.skip.num_checkpoints()
        );
        Ok(Some(TermInfo {
            doc_freq: term.doc_freq,
            freq_pointer: term.freq_start,
            prox_pointer: term.prox_start,
            skip_offset,
            skip_length,
        }))
    }

    pub fn close(&mut self) -> Result<()> {
        if self.term.is_some() {
            return Err(QuireError::invalid_state("close called while a term is open"));
        }
        self.freq.close()?;
        self.prox.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    fn writer() -> PostingsWriter {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        PostingsWriter::new(&storage, "_0.frq", "_0.prx", 4).unwrap()
    }

    #[test]
    fn test_decreasing_doc_is_corruption() {
        let mut writer = writer();
        writer.start_term().unwrap();
        writer.add_doc(5, &[0]).unwrap();
        let err = writer.add_doc(5, &[1]).unwrap_err();
        assert!(err.is_corruption());
        assert!(writer.add_doc(3, &[1]).unwrap_err().is_corruption());
    }

    #[test]
    fn test_term_without_postings_is_omitted() {
        let mut writer = writer();
        writer.start_term().unwrap();
        writer.add_doc(1, &[]).unwrap();
        assert_eq!(writer.finish_term().unwrap(), None);

        writer.start_term().unwrap();
        writer.add_doc(2, &[0, 3]).unwrap();
        let info = writer.finish_term().unwrap().unwrap();
        assert_eq!(info.doc_freq, 1);
        assert_eq!(info.skip_length, 0);
        writer.close().unwrap();
    }

    #[test]
    fn test_lifecycle_misuse() {
        let mut writer = writer();
        assert!(matches!(
            writer.add_doc(0, &[0]),
            Err(QuireError::InvalidState(_))
        ));
        writer.start_term().unwrap();
        assert!(matches!(writer.start_term(), Err(QuireError::InvalidState(_))));
        assert!(matches!(writer.close(), Err(QuireError::InvalidState(_))));
    }
}

//! Skip checkpoints over a term's postings.
//!
//! After every `skip_interval`-th document of a term, the writer records the
//! document id and the `.frq`/`.prx` file pointers just past that document's
//! postings. Each record is three varints holding deltas from the previous
//! checkpoint; the first one is relative to doc 0 and the term's start
//! pointers. All records of a term are written as one trailer directly after
//! its postings in `.frq`.

use crate::error::{QuireError, Result};
use crate::storage::StorageOutput;
use crate::storage::structured::StructWriter;
use crate::util::varint::{self, VarintCursor};

/// An absolute checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last document id covered by the checkpoint.
    pub doc: u32,
    /// `.frq` pointer of the next document's entry.
    pub freq_pointer: u64,
    /// `.prx` pointer of the next document's positions.
    pub prox_pointer: u64,
}

/// Buffers the checkpoints of the term being written.
#[derive(Debug)]
pub struct SkipListWriter {
    interval: u32,
    buffer: Vec<u8>,
    last: SkipEntry,
    count: u32,
}

impl SkipListWriter {
    pub fn new(interval: u32) -> Self {
        SkipListWriter {
            interval,
            buffer: Vec::new(),
            last: SkipEntry {
                doc: 0,
                freq_pointer: 0,
                prox_pointer: 0,
            },
            count: 0,
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Start a new term whose postings begin at the given pointers.
    pub fn reset(&mut self, freq_start: u64, prox_start: u64) {
        self.buffer.clear();
        self.count = 0;
        self.last = SkipEntry {
            doc: 0,
            freq_pointer: freq_start,
            prox_pointer: prox_start,
        };
    }

    /// Whether writing the `docs_written`-th document completes an interval.
    pub fn should_checkpoint(&self, docs_written: u32) -> bool {
        docs_written > 0 && docs_written % self.interval == 0
    }

    pub fn add_checkpoint(&mut self, entry: SkipEntry) {
        varint::write_u64(&mut self.buffer, (entry.doc - self.last.doc) as u64);
        varint::write_u64(
            &mut self.buffer,
            entry.freq_pointer - self.last.freq_pointer,
        );
        varint::write_u64(
            &mut self.buffer,
            entry.prox_pointer - self.last.prox_pointer,
        );
        self.last = entry;
        self.count += 1;
    }

    pub fn num_checkpoints(&self) -> u32 {
        self.count
    }

    /// Append the buffered trailer, returning its byte length.
    pub fn write_to<W: StorageOutput>(&self, out: &mut StructWriter<W>) -> Result<u64> {
        out.write_bytes(&self.buffer)?;
        Ok(self.buffer.len() as u64)
    }
}

/// Decode a term's trailer into absolute checkpoints.
pub fn decode_skip_list(trailer: &[u8], freq_start: u64, prox_start: u64) -> Result<Vec<SkipEntry>> {
    let mut cursor = VarintCursor::new(trailer);
    let mut entries = Vec::new();
    let mut last = SkipEntry {
        doc: 0,
        freq_pointer: freq_start,
        prox_pointer: prox_start,
    };
    while !cursor.is_empty() {
        let doc_delta = cursor.read_u32()?;
        let freq_delta = cursor.read_u64()?;
        let prox_delta = cursor.read_u64()?;
        if !entries.is_empty() && doc_delta == 0 {
            return Err(QuireError::corruption("skip checkpoints not increasing"));
        }
        last = SkipEntry {
            doc: last
                .doc
                .checked_add(doc_delta)
                .ok_or_else(|| QuireError::corruption("skip doc id overflow"))?,
            freq_pointer: last.freq_pointer + freq_delta,
            prox_pointer: last.prox_pointer + prox_delta,
        };
        entries.push(last);
    }
    Ok(entries)
}

/// Index of the last checkpoint whose doc is below `target`.
pub fn find_checkpoint(entries: &[SkipEntry], target: u32) -> Option<usize> {
    let below = entries.partition_point(|entry| entry.doc < target);
    below.checked_sub(1)
}

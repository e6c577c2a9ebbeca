//! Appends the merged postings of one term across source segments.

use log::trace;

use crate::error::{QuireError, Result};
use crate::index::live_docs::DocMap;
use crate::index::term::TermInfo;
use crate::merge::term_merger::MergedTerm;
use crate::postings::{PostingsReader, PostingsWriter};

/// A merge input as seen by the postings merger.
#[derive(Debug, Clone, Copy)]
pub struct PostingsSource<'a> {
    pub postings: &'a PostingsReader,
    pub doc_map: &'a DocMap,
    /// First merged doc id of this segment's live documents.
    pub doc_base: u32,
}

/// Writes merged postings (and their skip trailers) to the output streams.
#[derive(Debug)]
pub struct PostingsMerger {
    writer: PostingsWriter,
    docs_written: u64,
    docs_dropped: u64,
}

impl PostingsMerger {
    pub fn new(writer: PostingsWriter) -> Self {
        PostingsMerger {
            writer,
            docs_written: 0,
            docs_dropped: 0,
        }
    }

    /// Postings written across all terms.
    pub fn docs_written(&self) -> u64 {
        self.docs_written
    }

    /// Postings of deleted documents left behind.
    pub fn docs_dropped(&self) -> u64 {
        self.docs_dropped
    }

    /// Append `term`'s postings from every matching segment, remapping doc
    /// ids. Returns `None` when every posting belonged to a deleted document.
    pub fn merge_term(
        &mut self,
        term: &MergedTerm<'_>,
        sources: &[PostingsSource<'_>],
    ) -> Result<Option<TermInfo>> {
        self.writer.start_term()?;
        for cursor in &term.matches {
            let source = sources.get(cursor.segment()).ok_or_else(|| {
                QuireError::invalid_state(format!(
                    "no postings source for segment {}",
                    cursor.segment()
                ))
            })?;
            let mut postings = source.postings.postings(cursor.info())?;
            while let Some(doc) = postings.next_doc()? {
                let Some(mapped) = source.doc_map.get(doc) else {
                    self.docs_dropped += 1;
                    continue;
                };
                let positions = postings.positions()?;
                let merged_doc = source
                    .doc_base
                    .checked_add(mapped)
                    .ok_or_else(|| QuireError::corruption("merged doc id overflow"))?;
                self.writer.add_doc(merged_doc, &positions)?;
                self.docs_written += 1;
            }
        }
        let info = self.writer.finish_term()?;
        if info.is_none() {
            trace!(
                "dropping {}:{} with no live postings",
                term.field,
                String::from_utf8_lossy(term.bytes)
            );
        }
        Ok(info)
    }

    pub fn close(mut self) -> Result<()> {
        self.writer.close()
    }
}

//! K-way merge of sorted per-segment term dictionaries.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::index::term::TermInfo;
use crate::postings::{TermDictionary, TermEntry};

/// Position of one segment's dictionary on its current term.
///
/// Cursors are plain values: advancing yields a new cursor or `None` once
/// the dictionary is exhausted.
#[derive(Clone, Copy)]
pub struct TermCursor<'a> {
    segment: usize,
    index: usize,
    dictionary: &'a TermDictionary,
}

impl<'a> TermCursor<'a> {
    /// Cursor on the first term of `dictionary`, if any.
    pub fn first(segment: usize, dictionary: &'a TermDictionary) -> Option<Self> {
        TermCursor {
            segment,
            index: 0,
            dictionary,
        }
        .valid()
    }

    pub fn advance(self) -> Option<Self> {
        TermCursor {
            index: self.index + 1,
            ..self
        }
        .valid()
    }

    fn valid(self) -> Option<Self> {
        (self.index < self.dictionary.len()).then_some(self)
    }

    /// Index of the source segment in merge order.
    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn entry(&self) -> &'a TermEntry {
        &self.dictionary.entries()[self.index]
    }

    pub fn info(&self) -> &'a TermInfo {
        &self.entry().info
    }

    fn key(&self) -> (&'a str, &'a [u8]) {
        let term = &self.entry().term;
        (term.field.as_str(), term.bytes.as_slice())
    }
}

impl std::fmt::Debug for TermCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermCursor")
            .field("segment", &self.segment)
            .field("index", &self.index)
            .field("term", &self.entry().term)
            .finish()
    }
}

impl PartialEq for TermCursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TermCursor<'_> {}

impl PartialOrd for TermCursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermCursor<'_> {
    /// By term, then by segment so matching cursors pop in merge order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key()
            .cmp(&other.key())
            .then(self.segment.cmp(&other.segment))
    }
}

/// One distinct term and the cursors of every segment containing it, in
/// segment order.
#[derive(Debug)]
pub struct MergedTerm<'a> {
    pub field: &'a str,
    pub bytes: &'a [u8],
    pub matches: Vec<TermCursor<'a>>,
}

/// Min-heap of term cursors yielding one [`MergedTerm`] per distinct term.
#[derive(Debug, Default)]
pub struct TermMerger<'a> {
    queue: BinaryHeap<Reverse<TermCursor<'a>>>,
}

impl<'a> TermMerger<'a> {
    /// Merge `dictionaries`; the iteration index is the segment index.
    pub fn new<I>(dictionaries: I) -> Self
    where
        I: IntoIterator<Item = &'a TermDictionary>,
    {
        let queue = dictionaries
            .into_iter()
            .enumerate()
            .filter_map(|(segment, dictionary)| TermCursor::first(segment, dictionary))
            .map(Reverse)
            .collect();
        TermMerger { queue }
    }

    /// Number of dictionaries not yet exhausted.
    pub fn live_cursors(&self) -> usize {
        self.queue.len()
    }

    /// Pop every cursor on the smallest term, re-queue their successors and
    /// return the batch. `None` once all dictionaries are exhausted.
    pub fn next_term(&mut self) -> Option<MergedTerm<'a>> {
        let Reverse(top) = self.queue.pop()?;
        let (field, bytes) = top.key();
        let mut matches = vec![top];
        while let Some(Reverse(next)) = self.queue.peek() {
            if next.key() != (field, bytes) {
                break;
            }
            if let Some(Reverse(next)) = self.queue.pop() {
                matches.push(next);
            }
        }
        for cursor in &matches {
            if let Some(advanced) = cursor.advance() {
                self.queue.push(Reverse(advanced));
            }
        }
        Some(MergedTerm {
            field,
            bytes,
            matches,
        })
    }
}

impl<'a> Iterator for TermMerger<'a> {
    type Item = MergedTerm<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_term()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::index::field_infos::FieldInfos;
    use crate::postings::TermDictWriter;
    use crate::storage::Storage;
    use crate::storage::memory::MemoryStorage;

    fn dictionary(storage: &Arc<dyn Storage>, file: &str, terms: &[(&str, &str)]) -> TermDictionary {
        let mut fields = FieldInfos::new();
        let mut writer = TermDictWriter::new(storage, file, 16).unwrap();
        for (i, (field, text)) in terms.iter().enumerate() {
            let number = fields.add_or_update(field, true, false, false, None).unwrap();
            let info = TermInfo {
                doc_freq: 1,
                freq_pointer: i as u64 * 4,
                prox_pointer: i as u64 * 4,
                ..TermInfo::default()
            };
            writer.add(field, number, text.as_bytes(), &info).unwrap();
        }
        writer.close().unwrap();
        TermDictionary::read(storage, file, &fields).unwrap()
    }

    #[test]
    fn test_merges_in_order_and_groups_duplicates() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let a = dictionary(&storage, "a.tis", &[("body", "ant"), ("body", "cat"), ("title", "cat")]);
        let b = dictionary(&storage, "b.tis", &[("body", "bee"), ("body", "cat")]);
        let c = dictionary(&storage, "c.tis", &[]);

        let merged: Vec<(String, String, Vec<usize>)> = TermMerger::new([&a, &b, &c])
            .map(|term| {
                (
                    term.field.to_string(),
                    String::from_utf8(term.bytes.to_vec()).unwrap(),
                    term.matches.iter().map(TermCursor::segment).collect(),
                )
            })
            .collect();
        assert_eq!(
            merged,
            vec![
                ("body".to_string(), "ant".to_string(), vec![0]),
                ("body".to_string(), "bee".to_string(), vec![1]),
                ("body".to_string(), "cat".to_string(), vec![0, 1]),
                ("title".to_string(), "cat".to_string(), vec![0]),
            ]
        );
    }

    #[test]
    fn test_cursor_advance_exhausts() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::default());
        let a = dictionary(&storage, "a.tis", &[("f", "x")]);
        let cursor = TermCursor::first(0, &a).unwrap();
        assert_eq!(cursor.entry().term.bytes, b"x");
        assert!(cursor.advance().is_none());
        assert!(TermMerger::new([&a]).nth(1).is_none());
    }
}

//! Segment merging.
//!
//! [`SegmentMerger`] drives the merge: field infos and stored documents
//! first (fixing each input's doc id base), then the k-way term merge with
//! [`TermMerger`] feeding [`PostingsMerger`], then norms and doc values.

pub mod doc_values_merger;
pub mod postings_merger;
pub mod segment_merger;
pub mod term_merger;

pub use doc_values_merger::{DocValuesMerger, DocValuesSource, OrdinalMap};
pub use postings_merger::{PostingsMerger, PostingsSource};
pub use segment_merger::{MergedSegment, SegmentMerger};
pub use term_merger::{MergedTerm, TermCursor, TermMerger};

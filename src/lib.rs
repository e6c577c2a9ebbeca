//! # Quire
//!
//! Segment construction and segment merging for an inverted-index search
//! library.
//!
//! ## Features
//!
//! - Flushing pre-tokenized documents into immutable segments
//! - K-way term dictionary merge with deletion-aware doc id remapping
//! - Postings with skip checkpoints for sub-linear `advance`
//! - Doc values with per-field compression strategy selection
//! - Incremental term vector writing with gap filling
//! - Pluggable byte stores (in-memory and file system)

pub mod config;
pub mod doc_values;
mod error;
pub mod index;
pub mod merge;
pub mod postings;
pub mod segment;
pub mod storage;
pub mod term_vectors;
pub mod util;

// Re-exports for the public API
pub use config::CodecConfig;
pub use doc_values::{DocValuesReader, DocValuesWriter, NumericStrategy};
pub use error::{QuireError, Result};
pub use index::{DocValuesType, FieldInfo, FieldInfos, LiveDocs, SegmentInfo, StoredValue, Term};
pub use merge::{MergedSegment, SegmentMerger};
pub use segment::{DocValue, IndexDocument, SegmentBuilder, SegmentReader, delete_documents};
pub use storage::{Storage, StorageConfig, StorageFactory};
pub use term_vectors::{TermVectorField, TermVectorsReader, TermVectorsWriter};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Segment metadata and per-document side files.

pub mod field_infos;
pub mod live_docs;
pub mod norms;
pub mod segment_info;
pub mod stored_fields;
pub mod term;

pub use field_infos::{DocValuesType, FieldInfo, FieldInfos};
pub use live_docs::{DocMap, LiveDocs};
pub use segment_info::SegmentInfo;
pub use stored_fields::{StoredDocument, StoredValue};
pub use term::{Term, TermInfo};

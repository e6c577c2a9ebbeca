//! Per-document term vectors stored in the `tvx`/`tvd`/`tvf` file triple.

pub mod field;
pub mod reader;
pub mod writer;

pub use field::{TermVectorField, TermVectorTerm};
pub use reader::TermVectorsReader;
pub use writer::{PerDocHandle, TermVectorsWriter};

/// Version written as the 4-byte header of each of the three files.
pub const VECTORS_FORMAT_VERSION: u32 = 1;

pub(crate) const VECTORS_HEADER_LENGTH: u64 = 4;

/// Two 8-byte pointers per document in `tvx`.
pub(crate) const TVX_ENTRY_LENGTH: u64 = 16;

//! Columnar per-document values.
//!
//! The metadata stream (`.dvm`) is a header and the segment's document
//! count, followed by one entry per column:
//!
//! ```text
//! vint(field) u8(type) u64(data pointer) <type-specific header>
//! ```
//!
//! `NUMBER` entries carry a [`NumericStrategy`] tag and its parameters;
//! `BYTES` entries the total length, min/max payload length and, for
//! variable lengths, the address table pointer and block size; `FST`
//! entries the number of ordinals. The stream ends with the field number
//! `u32::MAX` and a checksum footer.
//!
//! Sorted columns are an `FST` entry plus a `NUMBER` entry of ordinals under
//! the same field number; sorted-set columns an `FST` entry plus a `BYTES`
//! entry of per-document ordinal deltas.

pub mod reader;
pub mod strategy;
pub mod writer;

pub use reader::{DocValuesReader, SortedDocValues, SortedSetDocValues};
pub use strategy::NumericStrategy;
pub use writer::DocValuesWriter;

use crate::error::{QuireError, Result};

pub(crate) const DOC_VALUES_META_MAGIC: u32 = 0x4456_4D31; // "DVM1"
pub(crate) const DOC_VALUES_DATA_MAGIC: u32 = 0x4456_4431; // "DVD1"
pub(crate) const DOC_VALUES_VERSION: u32 = 1;

/// Field number that terminates the metadata stream.
pub(crate) const END_OF_FIELDS: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum EntryType {
    Number,
    Bytes,
    Fst,
}

impl EntryType {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            EntryType::Number => 0,
            EntryType::Bytes => 1,
            EntryType::Fst => 2,
        }
    }

    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(EntryType::Number),
            1 => Ok(EntryType::Bytes),
            2 => Ok(EntryType::Fst),
            other => Err(QuireError::corruption(format!(
                "unknown doc values entry type {other}"
            ))),
        }
    }
}

//! Low-level encoding utilities shared by the segment formats.

pub mod fst;
pub mod packed;
pub mod varint;

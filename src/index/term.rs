use std::cmp::Ordering;
use std::fmt;

/// A (field, bytes) pair. Terms order by field name, then by unsigned
/// lexicographic byte order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    pub field: String,
    pub bytes: Vec<u8>,
}

impl Term {
    pub fn new(field: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Term {
            field: field.into(),
            bytes: bytes.into(),
        }
    }

    pub fn text(field: impl Into<String>, text: &str) -> Self {
        Term::new(field, text.as_bytes())
    }

    /// Compare against a borrowed (field, bytes) pair without allocating.
    pub fn cmp_parts(&self, field: &str, bytes: &[u8]) -> Ordering {
        self.field
            .as_str()
            .cmp(field)
            .then_with(|| self.bytes.as_slice().cmp(bytes))
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.bytes) {
            Ok(text) => write!(f, "{}:{text}", self.field),
            Err(_) => write!(f, "{}:{:?}", self.field, self.bytes),
        }
    }
}

/// Dictionary entry locating a term's postings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermInfo {
    /// Number of documents containing the term.
    pub doc_freq: u32,

    /// Start of the term's postings in `.frq`.
    pub freq_pointer: u64,

    /// Start of the term's positions in `.prx`.
    pub prox_pointer: u64,

    /// Offset of the skip trailer from `freq_pointer`.
    pub skip_offset: u64,

    /// Byte length of the skip trailer; 0 when the term has no checkpoints.
    pub skip_length: u64,
}

//! Pre-tokenized documents accepted by [`SegmentBuilder`](super::SegmentBuilder).

use crate::index::field_infos::DocValuesType;
use crate::index::stored_fields::StoredValue;

/// One token of an indexed field: term bytes, position and optionally the
/// `(start, end)` character offsets it was analyzed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: Vec<u8>,
    pub position: u32,
    pub offsets: Option<(u32, u32)>,
}

impl Token {
    pub fn new(term: impl Into<Vec<u8>>, position: u32) -> Self {
        Token {
            term: term.into(),
            position,
            offsets: None,
        }
    }

    pub fn with_offsets(mut self, start: u32, end: u32) -> Self {
        self.offsets = Some((start, end));
        self
    }
}

/// An indexed field's token stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedField {
    pub name: String,
    pub tokens: Vec<Token>,
    pub store_term_vectors: bool,
    pub omit_norms: bool,
}

/// A single columnar value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocValue {
    Numeric(i64),
    Binary(Vec<u8>),
    Sorted(Vec<u8>),
    SortedSet(Vec<Vec<u8>>),
}

impl DocValue {
    pub fn doc_values_type(&self) -> DocValuesType {
        match self {
            DocValue::Numeric(_) => DocValuesType::Numeric,
            DocValue::Binary(_) => DocValuesType::Binary,
            DocValue::Sorted(_) => DocValuesType::Sorted,
            DocValue::SortedSet(_) => DocValuesType::SortedSet,
        }
    }
}

/// A document whose text has already been analyzed into tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexDocument {
    pub indexed: Vec<IndexedField>,
    pub stored: Vec<(String, StoredValue)>,
    pub doc_values: Vec<(String, DocValue)>,
}

impl IndexDocument {
    pub fn new() -> Self {
        IndexDocument::default()
    }

    /// Add a field whose tokens take consecutive positions starting at 0.
    pub fn with_text<I, T>(self, name: &str, terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        let tokens = terms
            .into_iter()
            .enumerate()
            .map(|(position, term)| Token::new(term, position as u32))
            .collect();
        self.with_tokens(name, tokens, false)
    }

    /// Like [`with_text`](Self::with_text), also storing term vectors.
    pub fn with_text_vectors<I, T>(mut self, name: &str, terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        self = self.with_text(name, terms);
        if let Some(field) = self.indexed.last_mut() {
            field.store_term_vectors = true;
        }
        self
    }

    pub fn with_tokens(mut self, name: &str, tokens: Vec<Token>, store_term_vectors: bool) -> Self {
        self.indexed.push(IndexedField {
            name: name.to_string(),
            tokens,
            store_term_vectors,
            omit_norms: false,
        });
        self
    }

    pub fn with_stored(mut self, name: &str, value: StoredValue) -> Self {
        self.stored.push((name.to_string(), value));
        self
    }

    pub fn with_doc_value(mut self, name: &str, value: DocValue) -> Self {
        self.doc_values.push((name.to_string(), value));
        self
    }
}

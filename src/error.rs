//! Error types for segment construction and merging.
//!
//! All fallible operations in this crate return [`Result`]. The
//! [`QuireError::Corruption`] variant is the fatal class: a flush or merge
//! that observes it stops and discards the files it has written so far.

use thiserror::Error;

/// The error type for all segment I/O, encoding and merge operations.
#[derive(Error, Debug)]
pub enum QuireError {
    /// Underlying byte store failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Segment metadata (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// FST construction or decoding failure.
    #[error("FST error: {0}")]
    Fst(#[from] fst::Error),

    /// On-disk data violates a format invariant. Never retried.
    #[error("Corruption: {0}")]
    Corruption(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("{0}")]
    Other(String),
}

impl QuireError {
    /// Create a corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        QuireError::Corruption(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        QuireError::InvalidArgument(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        QuireError::InvalidConfig(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        QuireError::InvalidState(msg.into())
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuireError::NotFound(msg.into())
    }

    /// Create an index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        QuireError::Index(msg.into())
    }

    /// Create a generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        QuireError::Other(msg.into())
    }

    /// Whether this error means the segment being built or merged must be
    /// abandoned.
    pub fn is_corruption(&self) -> bool {
        matches!(self, QuireError::Corruption(_))
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, QuireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QuireError::corruption("tvx size mismatch");
        assert_eq!(err.to_string(), "Corruption: tvx size mismatch");
        assert!(err.is_corruption());

        let err = QuireError::invalid_config("skip_interval must be > 0");
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: QuireError = io.into();
        assert!(matches!(err, QuireError::Io(_)));
    }
}

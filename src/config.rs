//! Codec configuration shared by segment flush and merge.

use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};

/// Parameters that shape the on-disk encodings.
///
/// Both sides of a merge must use the same values for `skip_interval`;
/// readers pick it up from the segment's term dictionary header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Number of documents between two skip checkpoints.
    pub skip_interval: u32,

    /// Block size of block-packed and monotonic doc values.
    pub doc_values_block_size: usize,

    /// Maximum distinct values tracked before a numeric field gives up on
    /// table compression.
    pub max_table_values: usize,

    /// Norm byte written for documents that have no value for a normed field.
    pub default_norm: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            skip_interval: 16,
            doc_values_block_size: 4096,
            max_table_values: 256,
            default_norm: 0,
        }
    }
}

impl CodecConfig {
    pub fn with_skip_interval(mut self, skip_interval: u32) -> Self {
        self.skip_interval = skip_interval;
        self
    }

    pub fn with_doc_values_block_size(mut self, block_size: usize) -> Self {
        self.doc_values_block_size = block_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.skip_interval == 0 {
            return Err(QuireError::invalid_config("skip_interval must be > 0"));
        }
        if !self.doc_values_block_size.is_power_of_two()
            || !(64..=65536).contains(&self.doc_values_block_size)
        {
            return Err(QuireError::invalid_config(format!(
                "doc_values_block_size must be a power of two in 64..=65536, got {}",
                self.doc_values_block_size
            )));
        }
        if !(1..=256).contains(&self.max_table_values) {
            return Err(QuireError::invalid_config(format!(
                "max_table_values must be in 1..=256, got {}",
                self.max_table_values
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        CodecConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_values() {
        assert!(CodecConfig::default().with_skip_interval(0).validate().is_err());
        assert!(
            CodecConfig::default()
                .with_doc_values_block_size(1000)
                .validate()
                .is_err()
        );
        let config = CodecConfig {
            max_table_values: 300,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(QuireError::InvalidConfig(_))));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = CodecConfig::default().with_skip_interval(128);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CodecConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}

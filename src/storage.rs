//! Byte store abstraction used by every segment file.
//!
//! Outputs are append-only streams that report their current file pointer;
//! inputs are random access. Segment code only ever talks to these traits,
//! so the same writers run against [`memory::MemoryStorage`] in tests and
//! [`file::FileStorage`] on disk.

pub mod file;
pub mod memory;
pub mod structured;

use std::io::{Read, Seek, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::file::{FileStorage, FileStorageConfig};
use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};

/// A named-file byte store.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Check whether a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all file names.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Length of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;
}

/// An append-only output stream.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Current file pointer, i.e. the number of bytes written so far.
    fn position(&self) -> u64;

    /// Flush buffered bytes and make them durable.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Flush and release the stream. Further writes are an error.
    fn close(&mut self) -> Result<()>;
}

/// A random-access input stream.
pub trait StorageInput: Read + Seek + Send + std::fmt::Debug {
    /// Total length of the underlying file.
    fn size(&self) -> Result<u64>;
}

impl<T: StorageOutput + ?Sized> StorageOutput for Box<T> {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        (**self).flush_and_sync()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<T: StorageInput + ?Sized> StorageInput for Box<T> {
    fn size(&self) -> Result<u64> {
        (**self).size()
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageConfig {
    Memory(MemoryStorageConfig),
    File(FileStorageConfig),
}

/// Builds a [`Storage`] from a [`StorageConfig`].
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(config) => Ok(Arc::new(MemoryStorage::new(config))),
            StorageConfig::File(config) => Ok(Arc::new(FileStorage::new(config)?)),
        }
    }
}

//! In-memory storage backend.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Configuration for [`MemoryStorage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStorageConfig {
    /// Initial capacity reserved for each new output buffer.
    #[serde(default)]
    pub initial_output_capacity: usize,
}

type FileMap = Arc<RwLock<HashMap<String, Arc<[u8]>>>>;

/// A storage that keeps every file as an immutable byte buffer.
///
/// Outputs publish their bytes on flush and on close, so a file becomes
/// visible to readers once its writer has been closed.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    files: FileMap,
    config: MemoryStorageConfig,
}

impl MemoryStorage {
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryStorageConfig::default())
    }
}

impl Storage for MemoryStorage {
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        self.files.write().insert(name.to_string(), Arc::from(Vec::new()));
        Ok(Box::new(MemoryOutput {
            name: name.to_string(),
            buffer: Vec::with_capacity(self.config.initial_output_capacity),
            files: self.files.clone(),
            closed: false,
        }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let data = self
            .files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| QuireError::not_found(format!("file {name}")))?;
        Ok(Box::new(MemoryInput::new(data)))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        self.files
            .read()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| QuireError::not_found(format!("file {name}")))
    }
}

/// Output stream of a [`MemoryStorage`] file.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn publish(&self) {
        self.files
            .write()
            .insert(self.name.clone(), Arc::from(self.buffer.as_slice()));
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other(format!(
                "write to closed output {}",
                self.name
            )));
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.publish();
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        if !self.closed {
            self.publish();
        }
    }
}

/// Random-access reader over an immutable byte buffer.
#[derive(Debug, Clone)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl MemoryInput {
    pub fn new(data: Arc<[u8]>) -> Self {
        MemoryInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Seek for MemoryInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl StorageInput for MemoryInput {
    fn size(&self) -> Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }
}

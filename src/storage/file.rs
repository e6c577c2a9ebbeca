//! Directory-backed storage backend.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{QuireError, Result};
use crate::storage::{Storage, StorageInput, StorageOutput};

/// Configuration for [`FileStorage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStorageConfig {
    /// Directory holding the segment files.
    pub path: PathBuf,

    /// Buffer size for readers and writers.
    pub buffer_size: usize,

    /// Whether `flush_and_sync` calls fsync.
    pub sync_writes: bool,
}

impl FileStorageConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileStorageConfig {
            path: path.into(),
            buffer_size: 64 * 1024,
            sync_writes: false,
        }
    }
}

/// A storage rooted at one directory; file names map to flat paths.
#[derive(Debug)]
pub struct FileStorage {
    config: FileStorageConfig,
}

impl FileStorage {
    pub fn new(config: FileStorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Ok(FileStorage { config })
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(QuireError::invalid_argument(format!(
                "invalid file name: {name:?}"
            )));
        }
        Ok(self.config.path.join(name))
    }
}

impl Storage for FileStorage {
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        let path = self.path_of(name)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileOutput {
            writer: Some(BufWriter::with_capacity(self.config.buffer_size, file)),
            position: 0,
            sync_writes: self.config.sync_writes,
            path,
        }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let path = self.path_of(name)?;
        let file = File::open(&path)
            .map_err(|e| QuireError::not_found(format!("{}: {e}", path.display())))?;
        let size = file.metadata()?.len();
        Ok(Box::new(FileInput {
            reader: BufReader::with_capacity(self.config.buffer_size, file),
            size,
        }))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path_of(name).map(|p| p.is_file()).unwrap_or(false)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        Ok(fs::metadata(self.path_of(name)?)?.len())
    }
}

#[derive(Debug)]
struct FileOutput {
    writer: Option<BufWriter<File>>,
    position: u64,
    sync_writes: bool,
    path: PathBuf,
}

impl Write for FileOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::other(format!("write to closed output {}", self.path.display()))
        })?;
        let n = writer.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl StorageOutput for FileOutput {
    fn position(&self) -> u64 {
        self.position
    }

    fn flush_and_sync(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            if self.sync_writes {
                writer.get_ref().sync_all()?;
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush_and_sync()?;
        self.writer = None;
        Ok(())
    }
}

#[derive(Debug)]
struct FileInput {
    reader: BufReader<File>,
    size: u64,
}

impl Read for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Seek for FileInput {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.reader.seek(pos)
    }
}

impl StorageInput for FileInput {
    fn size(&self) -> Result<u64> {
        Ok(self.size)
    }
}

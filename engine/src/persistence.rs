//! Byte-oriented persistence backends.
//!
//! The store serializes each collection into a
//! [`CollectionSnapshot`](crate::CollectionSnapshot) and hands the bytes to a
//! backend keyed by collection name. Without a backend the store is purely
//! in-memory.

use crate::{error::Result, Error};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A key/value byte store keyed by collection name.
pub trait PersistenceBackend: fmt::Debug {
    /// Read the bytes stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing previous contents.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// All keys currently stored.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Keeps bytes in process memory. Useful for tests and for buffering.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

/// Stores one `<collection>.json` file per collection in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

const FILE_EXTENSION: &str = "json";

impl FileBackend {
    /// Use `dir` as the storage directory, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    /// The storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(Error::Persistence(format!(
                "invalid collection key for file storage: {key:?}"
            )));
        }
        Ok(self.dir.join(format!("{key}.{FILE_EXTENSION}")))
    }
}

impl PersistenceBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        fs::read(&path).map(Some).map_err(|e| io_error(&path, e))
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        // Write-then-rename so a crash never leaves a truncated collection.
        let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        fs::write(&tmp, bytes).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::Persistence(format!("{}: {}", path.display(), err))
}

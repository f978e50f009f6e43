// src/store/storage.rs
//! Durable key-value backends for conversation snapshots

use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Flat string key-value storage, the durable side of the conversation store
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Stores each key as `<dir>/<key>.json`
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(FileKeyValueStore { dir })
    }

    /// Default location under the user's data directory
    pub fn new_default() -> Result<Self, StorageError> {
        let mut dir = dirs::data_dir().ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine XDG_DATA_HOME directory",
            ))
        })?;
        dir.push("persona-chat");
        Self::new(dir)
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        // Keys become file names, keep them to a safe alphabet
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        debug!("Read {} bytes from {}", contents.len(), path.display());
        Ok(Some(contents))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;

        // Write next to the target then rename so a crash never leaves a torn file
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.flush()?;
        drop(file);
        fs::rename(&tmp_path, &path)?;

        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

/// In-memory storage. Clones share the same map, so a test can reopen a store on it.
#[derive(Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.lock().insert(key.to_string(), value.to_string());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

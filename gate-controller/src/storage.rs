//! Persistent key-value storage
//!
//! The controller only ever persists a handful of named strings, so the
//! storage seam is a plain get/set of strings. Platform crates can back it
//! with whatever they have (NVS, shared preferences, a file).

use std::collections::HashMap;
use std::convert::Infallible;
use std::fs;
use std::path::{Path, PathBuf};

/// Trait for persistent string storage
pub trait KeyValueStore {
    /// Error type for storage operations
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a stored value
    fn get(&self, name: &str) -> Result<Option<String>, Self::Error>;

    /// Store a value, replacing any previous one
    fn set(&mut self, name: &str, value: &str) -> Result<(), Self::Error>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    type Error = T::Error;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        (**self).get(name)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), Self::Error> {
        (**self).set(name, value)
    }
}

/// In-memory store, nothing survives the process
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(name: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.entries.insert(name.to_string(), value.to_string());
        store
    }
}

impl KeyValueStore for MemoryStore {
    type Error = Infallible;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.entries.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), Self::Error> {
        self.entries.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access store file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store file {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Store backed by a JSON object on disk.
///
/// Loaded once on open; every `set` rewrites the whole file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries: HashMap<String, String> = if path.exists() {
            let data = fs::read_to_string(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            HashMap::new()
        };

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(&self.entries).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, data).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for JsonFileStore {
    type Error = StoreError;

    fn get(&self, name: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.entries.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), Self::Error> {
        let previous = self.entries.insert(name.to_string(), value.to_string());
        if let Err(e) = self.save() {
            // keep memory and disk in agreement
            match previous {
                Some(v) => self.entries.insert(name.to_string(), v),
                None => self.entries.remove(name),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("secureKey").unwrap(), None);
        store.set("secureKey", "abc").unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get("secureKey").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn json_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Json { .. })));
    }

    #[test]
    fn json_store_rolls_back_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        // parent directory does not exist, so every save fails
        let path = dir.path().join("missing").join("keys.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(matches!(store.set("secureKey", "abc"), Err(StoreError::Io { .. })));
        assert_eq!(store.get("secureKey").unwrap(), None);
    }
}

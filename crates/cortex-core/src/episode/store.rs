//! Episode persistence backends.
//!
//! The store is a key-value surface indexed by `correlation_id`. Two
//! backends ship with the runtime: an in-memory map for tests and
//! ephemeral use, and a directory of JSON files for durable records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::record::EpisodeRecord;

/// Errors raised by episode stores.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Filesystem failure.
    #[error("store io error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record for {correlation_id}: {source}")]
    Corrupt {
        /// The episode whose record is corrupt.
        correlation_id: String,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },
}

/// A key-value store of episode records indexed by correlation id.
pub trait EpisodeStore {
    /// Saves a record, replacing any previous one for the episode.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn save(&mut self, record: &EpisodeRecord) -> Result<(), StoreError>;

    /// Loads a record by correlation id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure or a corrupt record.
    fn load(&self, correlation_id: &str) -> Result<Option<EpisodeRecord>, StoreError>;

    /// Returns true when a record exists for the episode.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn exists(&self, correlation_id: &str) -> Result<bool, StoreError>;

    /// Deletes a record. Returns true when one was deleted.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn delete(&mut self, correlation_id: &str) -> Result<bool, StoreError>;

    /// Correlation ids of all stored episodes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on backend failure.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory store; records vanish with the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: BTreeMap<String, EpisodeRecord>,
}

impl InMemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EpisodeStore for InMemoryStore {
    fn save(&mut self, record: &EpisodeRecord) -> Result<(), StoreError> {
        self.records
            .insert(record.correlation_id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, correlation_id: &str) -> Result<Option<EpisodeRecord>, StoreError> {
        Ok(self.records.get(correlation_id).cloned())
    }

    fn exists(&self, correlation_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(correlation_id))
    }

    fn delete(&mut self, correlation_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(correlation_id).is_some())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.keys().cloned().collect())
    }
}

/// Directory-backed store: one JSON file per episode, named by
/// correlation id.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` when the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, correlation_id: &str) -> PathBuf {
        self.dir.join(format!("{correlation_id}.json"))
    }

    fn io_error(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl EpisodeStore for FileStore {
    fn save(&mut self, record: &EpisodeRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.correlation_id);
        let json = serde_json::to_vec_pretty(record).map_err(|source| StoreError::Corrupt {
            correlation_id: record.correlation_id.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| Self::io_error(&path, source))
    }

    fn load(&self, correlation_id: &str) -> Result<Option<EpisodeRecord>, StoreError> {
        let path = self.path_for(correlation_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(Self::io_error(&path, error)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                correlation_id: correlation_id.to_string(),
                source,
            })
    }

    fn exists(&self, correlation_id: &str) -> Result<bool, StoreError> {
        Ok(self.path_for(correlation_id).exists())
    }

    fn delete(&mut self, correlation_id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(correlation_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(Self::io_error(&path, error)),
        }
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| Self::io_error(&self.dir, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Self::io_error(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(id) = name.to_string_lossy().strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

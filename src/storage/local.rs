//! Local key/value storage
//!
//! Browser-style local storage for offline mirrors. Every value is wrapped
//! in a JSON envelope:
//!
//! ```json
//! {"value": ..., "timestamp": 1718000000000, "expiry": null, "version": 1}
//! ```
//!
//! Keys are stored as `<prefix><key>` (default prefix `app_`). Expired or
//! version-mismatched entries are deleted lazily on the next read.
//!
//! Read-modify-write through [`LocalStorage::update`] is serialized per key
//! within one process. Two processes sharing a [`FileBackend`] directory are
//! last-write-wins.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::StorageError;

/// Default key prefix
pub const DEFAULT_PREFIX: &str = "app_";

/// Current envelope version
pub const STORAGE_VERSION: u32 = 1;

/// Raw string storage underneath [`LocalStorage`]
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-process backend
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// One JSON file per key inside a directory
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{safe}.json"))
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        // Write-then-rename so readers never see a torn file
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    keys.push(stem.to_string());
                }
            }
        }
        Ok(keys)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    value: T,
    /// Write time, epoch milliseconds
    timestamp: i64,
    /// Expiry, epoch milliseconds
    expiry: Option<i64>,
    version: u32,
}

/// Prefixed, versioned key/value store with lazy TTL
pub struct LocalStorage {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
    version: u32,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage")
            .field("prefix", &self.prefix)
            .field("version", &self.version)
            .finish()
    }
}

impl LocalStorage {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            version: STORAGE_VERSION,
            locks: DashMap::new(),
        }
    }

    /// In-memory storage with the default prefix
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), DEFAULT_PREFIX)
    }

    /// File-backed storage rooted at `dir`
    pub fn open(dir: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self, StorageError> {
        Ok(Self::new(Arc::new(FileBackend::new(dir)?), prefix))
    }

    /// Override the envelope version (entries written under another version read as absent)
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Read a value, deleting it first if it expired or has a stale version
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let full_key = self.full_key(key);
        let Some(raw) = self.backend.read(&full_key)? else {
            return Ok(None);
        };

        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&raw)?;

        if envelope.version != self.version {
            tracing::debug!(
                key = full_key,
                found = envelope.version,
                expected = self.version,
                "Dropping storage entry with stale version"
            );
            self.backend.remove(&full_key)?;
            return Ok(None);
        }

        if let Some(expiry) = envelope.expiry {
            if Utc::now().timestamp_millis() >= expiry {
                tracing::debug!(key = full_key, "Dropping expired storage entry");
                self.backend.remove(&full_key)?;
                return Ok(None);
            }
        }

        Ok(Some(serde_json::from_value(envelope.value)?))
    }

    /// Write a value with an optional time-to-live
    pub fn set_item<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let now = Utc::now().timestamp_millis();
        let expiry = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            now.saturating_add(ttl_ms)
        });
        let envelope = Envelope {
            value,
            timestamp: now,
            expiry,
            version: self.version,
        };
        let raw = serde_json::to_string(&envelope)?;
        self.backend.write(&self.full_key(key), &raw)
    }

    pub fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.full_key(key))
    }

    /// Keys under this prefix, with the prefix stripped
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    /// Remove every key under this prefix
    pub fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.keys()?;
        for key in &keys {
            self.remove_item(key)?;
        }
        Ok(keys.len())
    }

    /// Read-modify-write under the per-key lock
    ///
    /// A missing, expired or unreadable value starts from `T::default()`.
    /// Returns the value that was written.
    pub fn update<T, F>(&self, key: &str, ttl: Option<Duration>, f: F) -> Result<T, StorageError>
    where
        T: Serialize + DeserializeOwned + Default + Clone,
        F: FnOnce(&mut T),
    {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut value: T = match self.get_item(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!(key, "Discarding unreadable storage entry: {}", e);
                T::default()
            }
        };
        f(&mut value);
        self.set_item(key, &value, ttl)?;
        Ok(value)
    }
}

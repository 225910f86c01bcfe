/*!
Archive storage adapters.

This module defines the storage abstraction (port) for archive blobs and its
implementations (adapters). Orchestrators only see `StorageAdapter`, so the
archive directory can be swapped for an in-memory store in tests.
*/

pub mod local;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{ArchivistError, Result};

pub use local::LocalFileStorage;

/// Storage abstraction for archive blobs, keyed by archive name
pub trait StorageAdapter: Send + Sync {
    /// Persist `data` under `key`, replacing any previous blob
    ///
    /// Implementations must not expose a partially written blob under `key`.
    fn save(&self, data: &[u8], key: &str) -> Result<()>;

    /// Load the blob stored under `key`
    fn load(&self, key: &str) -> Result<Vec<u8>>;

    /// Check if a blob exists under `key`
    fn exists(&self, key: &str) -> bool;

    /// Delete the blob under `key`; deleting a missing blob is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// Memory-based storage adapter
///
/// Stores archives in a `HashMap`. Useful for unit testing without
/// touching the filesystem.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| ArchivistError::storage("memory storage lock poisoned"))
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.guard().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageAdapter for MemoryStorage {
    fn save(&self, data: &[u8], key: &str) -> Result<()> {
        self.guard()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.guard()?
            .get(key)
            .cloned()
            .ok_or_else(|| ArchivistError::storage(format!("Archive not found: {key}")))
    }

    fn exists(&self, key: &str) -> bool {
        self.guard()
            .map(|data| data.contains_key(key))
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.guard()?.remove(key);
        Ok(())
    }
}

/*!
Local filesystem storage adapter implementation.
*/

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::StorageAdapter;
use crate::{ArchivistError, Result};

/// Local filesystem storage adapter
///
/// Archives are stored as files directly under a base directory. Writes go
/// to a temporary file in the same directory and are renamed into place, so
/// a reader never observes a half-written archive.
///
/// # Example
/// ```rust
/// use archivist_core::storage::{LocalFileStorage, StorageAdapter};
///
/// let dir = tempfile::tempdir()?;
/// let storage = LocalFileStorage::with_base_dir(dir.path());
/// storage.save(b"sealed archive bytes", "0001.bak")?;
/// assert!(storage.exists("0001.bak"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    base_dir: PathBuf,
}

impl LocalFileStorage {
    /// Create a storage adapter rooted at `base_dir`
    ///
    /// The directory is created lazily on first write.
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the full path for a given key, rejecting path traversal
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let candidate = Path::new(key);
        let plain = candidate
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(ArchivistError::storage(format!("Invalid archive key: {key}")));
        }
        Ok(self.base_dir.join(candidate))
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    ArchivistError::storage(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Write `data` to `path` through a sibling temp file and an atomic rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ArchivistError::storage(format!("No parent for {}", path.display())))?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| {
        ArchivistError::storage(format!("Failed to persist {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

impl StorageAdapter for LocalFileStorage {
    fn save(&self, data: &[u8], key: &str) -> Result<()> {
        let full_path = self.resolve_path(key)?;
        self.ensure_parent_dir(&full_path)?;

        write_atomic(&full_path, data).map_err(|e| {
            ArchivistError::storage(format!(
                "Failed to write archive to {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn load(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(key)?;

        fs::read(&full_path).map_err(|e| {
            ArchivistError::storage(format!(
                "Failed to read archive from {}: {}",
                full_path.display(),
                e
            ))
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_path(key)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.resolve_path(key)?;

        match fs::remove_file(&full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArchivistError::storage(format!(
                "Failed to delete archive {}: {}",
                full_path.display(),
                e
            ))),
        }
    }
}

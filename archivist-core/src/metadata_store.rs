/*!
Durable key-value store of one `BackupMetadata` record per backup id.

Every `put` is a full overwrite of the record. The file-backed store writes
through a temporary file and an atomic rename, so a crash leaves either the
previous or the new record on disk, never a mix of both.
*/

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::storage::local::write_atomic;
use crate::{ArchivistError, BackupMetadata, Result};

/// Name of the metadata subdirectory inside the archive directory
pub const METADATA_DIR: &str = "metadata";

/// Storage port for backup metadata
pub trait MetadataStore: Send + Sync {
    /// Insert or fully overwrite the record for `metadata.id`
    fn put(&self, metadata: &BackupMetadata) -> Result<()>;

    /// Fetch the record for `id`, if any
    fn get(&self, id: &str) -> Result<Option<BackupMetadata>>;

    /// All records, newest `created_at` first
    fn list(&self) -> Result<Vec<BackupMetadata>>;

    /// Remove the record for `id`; removing a missing record is not an error
    fn delete(&self, id: &str) -> Result<()>;
}

fn sort_newest_first(records: &mut [BackupMetadata]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Metadata store keeping one pretty-printed JSON file per backup
///
/// Layout: `<root>/<id>.json`, where `root` is normally
/// `<archive_dir>/metadata`.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    root: PathBuf,
}

impl FileMetadataStore {
    /// Open (creating if needed) a metadata directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            ArchivistError::storage(format!(
                "Failed to create metadata directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Open the conventional metadata directory beneath an archive directory
    pub fn in_archive_dir<P: AsRef<Path>>(archive_dir: P) -> Result<Self> {
        Self::open(archive_dir.as_ref().join(METADATA_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(ArchivistError::storage(format!("Invalid backup id: {id}")));
        }
        Ok(self.root.join(format!("{id}.json")))
    }
}

impl MetadataStore for FileMetadataStore {
    fn put(&self, metadata: &BackupMetadata) -> Result<()> {
        let path = self.record_path(&metadata.id)?;
        let json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&path, &json)?;
        debug!(backup_id = %metadata.id, status = %metadata.status, "Metadata written");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<BackupMetadata>> {
        let path = self.record_path(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let parsed = fs::read(&path)
                .map_err(ArchivistError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<BackupMetadata>(&bytes)?));
            match parsed {
                Ok(metadata) => records.push(metadata),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable metadata file"),
            }
        }

        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<()> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArchivistError::storage(format!(
                "Failed to delete metadata {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// In-memory metadata store for tests and embedders without durability needs
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<String, BackupMetadata>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> Result<MutexGuard<'_, HashMap<String, BackupMetadata>>> {
        self.records
            .lock()
            .map_err(|_| ArchivistError::storage("metadata store lock poisoned"))
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn put(&self, metadata: &BackupMetadata) -> Result<()> {
        self.guard()?.insert(metadata.id.clone(), metadata.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<BackupMetadata>> {
        Ok(self.guard()?.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<BackupMetadata>> {
        let mut records: Vec<_> = self.guard()?.values().cloned().collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.guard()?.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CompressionAlgorithm;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn record(age_days: i64) -> BackupMetadata {
        BackupMetadata::new_full(vec!["users".to_string()], CompressionAlgorithm::Gzip)
            .with_created_at(Utc::now() - Duration::days(age_days))
    }

    fn exercise_store(store: &dyn MetadataStore) {
        let old = record(10);
        let new = record(1);
        let middle = record(5);

        for metadata in [&old, &new, &middle] {
            store.put(metadata).unwrap();
        }

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(listed, vec![new.id.clone(), middle.id.clone(), old.id.clone()]);

        // full overwrite
        let mut updated = old.clone();
        updated.mark_in_progress().unwrap();
        store.put(&updated).unwrap();
        assert_eq!(store.get(&old.id).unwrap().unwrap(), updated);

        store.delete(&old.id).unwrap();
        assert!(store.get(&old.id).unwrap().is_none());
        store.delete(&old.id).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_in_memory_store() {
        exercise_store(&InMemoryMetadataStore::new());
    }

    #[test]
    fn test_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileMetadataStore::in_archive_dir(temp_dir.path()).unwrap();
        exercise_store(&store);
        assert!(temp_dir.path().join(METADATA_DIR).is_dir());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let metadata = record(0);

        FileMetadataStore::in_archive_dir(temp_dir.path())
            .unwrap()
            .put(&metadata)
            .unwrap();

        let reopened = FileMetadataStore::in_archive_dir(temp_dir.path()).unwrap();
        assert_eq!(reopened.get(&metadata.id).unwrap(), Some(metadata));
    }

    #[test]
    fn test_file_store_skips_garbage_files() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileMetadataStore::open(temp_dir.path()).unwrap();
        store.put(&record(0)).unwrap();

        fs::write(temp_dir.path().join("broken.json"), b"{ not json").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_rejects_path_like_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileMetadataStore::open(temp_dir.path()).unwrap();
        assert!(store.get("../etc/passwd").is_err());
    }
}

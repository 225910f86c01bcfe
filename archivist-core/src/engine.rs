/*!
Backup engine facade.

Wires the backup and restore orchestrators, retention, and the metadata
store around one shared operation gate.
*/

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::backup::BackupOrchestrator;
use crate::gate::OperationGate;
use crate::metadata_store::{FileMetadataStore, MetadataStore};
use crate::record_store::RecordStore;
use crate::restore::{RestoreOptions, RestoreOrchestrator, RestoreReport};
use crate::retention::{RetentionManager, RetentionReport};
use crate::storage::{LocalFileStorage, StorageAdapter};
use crate::{BackupConfig, BackupMetadata, Result};

/// Aggregate figures over every known backup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub total_backups: usize,
    pub completed_backups: usize,
    pub failed_backups: usize,
    /// Sum of archive sizes
    pub total_size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Main entry point for embedders and schedulers
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use archivist_core::{create_local_engine, BackupConfig, InMemoryRecordStore, RestoreOptions};
///
/// let config = BackupConfig::from_env()?;
/// let engine = create_local_engine(config, Arc::new(InMemoryRecordStore::new()))?;
///
/// let full = engine.create_full_backup()?;
/// let incremental = engine.create_incremental_backup(&full.id)?;
/// engine.restore(&incremental.id, &RestoreOptions::new().with_validation(true))?;
/// # Ok::<(), archivist_core::ArchivistError>(())
/// ```
pub struct BackupEngine<R, M, S>
where
    R: RecordStore,
    M: MetadataStore,
    S: StorageAdapter,
{
    config: BackupConfig,
    metadata: Arc<M>,
    gate: Arc<OperationGate>,
    backup: BackupOrchestrator<R, M, S>,
    restore: RestoreOrchestrator<R, M, S>,
    retention: RetentionManager<M, S>,
}

impl<R, M, S> BackupEngine<R, M, S>
where
    R: RecordStore,
    M: MetadataStore,
    S: StorageAdapter,
{
    /// Validate `config` and assemble the engine around the given stores
    pub fn new(
        config: BackupConfig,
        records: Arc<R>,
        metadata: Arc<M>,
        archives: Arc<S>,
    ) -> Result<Self> {
        config.validate()?;

        let gate = Arc::new(OperationGate::new());
        let backup = BackupOrchestrator::new(
            &config,
            Arc::clone(&records),
            Arc::clone(&metadata),
            Arc::clone(&archives),
            Arc::clone(&gate),
        );
        let restore = RestoreOrchestrator::new(
            &config,
            records,
            Arc::clone(&metadata),
            Arc::clone(&archives),
            Arc::clone(&gate),
        );
        let retention = RetentionManager::new(Arc::clone(&metadata), archives);

        info!(
            collections = config.collections.len(),
            algorithm = %config.compression_algorithm,
            retention_days = config.retention_days,
            "Backup engine ready"
        );
        Ok(Self {
            config,
            metadata,
            gate,
            backup,
            restore,
            retention,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Gate shared by backups and restores
    pub fn gate(&self) -> &Arc<OperationGate> {
        &self.gate
    }

    pub fn create_full_backup(&self) -> Result<BackupMetadata> {
        self.backup.create_full_backup()
    }

    pub fn create_incremental_backup(&self, base_backup_id: &str) -> Result<BackupMetadata> {
        self.backup.create_incremental_backup(base_backup_id)
    }

    pub fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        self.restore.restore(backup_id, options)
    }

    pub fn verify_backup(&self, backup_id: &str) -> bool {
        self.restore.verify_backup(backup_id)
    }

    /// All backups, newest first
    pub fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        self.metadata.list()
    }

    pub fn get_backup(&self, backup_id: &str) -> Result<Option<BackupMetadata>> {
        self.metadata.get(backup_id)
    }

    pub fn stats(&self) -> Result<BackupStats> {
        let backups = self.metadata.list()?;
        Ok(BackupStats {
            total_backups: backups.len(),
            completed_backups: backups.iter().filter(|b| b.is_completed()).count(),
            failed_backups: backups
                .iter()
                .filter(|b| b.status == crate::BackupStatus::Failed)
                .count(),
            total_size_bytes: backups.iter().map(|b| b.size_bytes).sum(),
            oldest: backups.iter().map(|b| b.created_at).min(),
            newest: backups.iter().map(|b| b.created_at).max(),
        })
    }

    pub fn cleanup_expired(&self, retention: chrono::Duration) -> Result<RetentionReport> {
        self.retention.cleanup_expired(retention)
    }

    pub fn cleanup_expired_at(
        &self,
        retention: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport> {
        self.retention.cleanup_expired_at(retention, now)
    }

    pub fn enforce_max_backups(&self, max_backups: usize) -> Result<RetentionReport> {
        self.retention.enforce_max_backups(max_backups)
    }

    /// Apply the configured retention period, then `max_backups` if set
    pub fn apply_retention_policy(&self) -> Result<RetentionReport> {
        let mut report = self.retention.cleanup_expired(self.config.retention_period())?;
        if let Some(max_backups) = self.config.max_backups {
            let by_count = self.retention.enforce_max_backups(max_backups)?;
            report.outcomes.extend(by_count.outcomes);
        }
        Ok(report)
    }
}

/// Object-safe view of the engine for schedulers that do not care about
/// the concrete stores
pub trait BackupEngineInterface: Send + Sync {
    fn create_full_backup(&self) -> Result<BackupMetadata>;
    fn create_incremental_backup(&self, base_backup_id: &str) -> Result<BackupMetadata>;
    fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport>;
    fn verify_backup(&self, backup_id: &str) -> bool;
    fn list_backups(&self) -> Result<Vec<BackupMetadata>>;
    fn apply_retention_policy(&self) -> Result<RetentionReport>;
}

impl<R, M, S> BackupEngineInterface for BackupEngine<R, M, S>
where
    R: RecordStore,
    M: MetadataStore,
    S: StorageAdapter,
{
    fn create_full_backup(&self) -> Result<BackupMetadata> {
        self.create_full_backup()
    }

    fn create_incremental_backup(&self, base_backup_id: &str) -> Result<BackupMetadata> {
        self.create_incremental_backup(base_backup_id)
    }

    fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        self.restore(backup_id, options)
    }

    fn verify_backup(&self, backup_id: &str) -> bool {
        self.verify_backup(backup_id)
    }

    fn list_backups(&self) -> Result<Vec<BackupMetadata>> {
        self.list_backups()
    }

    fn apply_retention_policy(&self) -> Result<RetentionReport> {
        self.apply_retention_policy()
    }
}

/// Engine storing archives and metadata under `config.archive_dir`
///
/// Archives go to `<archive_dir>/<id>.bak`, metadata to
/// `<archive_dir>/metadata/<id>.json`.
pub fn create_local_engine<R: RecordStore>(
    config: BackupConfig,
    records: Arc<R>,
) -> Result<BackupEngine<R, FileMetadataStore, LocalFileStorage>> {
    let metadata = FileMetadataStore::in_archive_dir(&config.archive_dir)?;
    let archives = LocalFileStorage::with_base_dir(&config.archive_dir);
    BackupEngine::new(config, records, Arc::new(metadata), Arc::new(archives))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::EncryptionKey;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::record_store::InMemoryRecordStore;
    use crate::storage::MemoryStorage;
    use crate::ArchivistError;
    use serde_json::json;

    fn engine(
        config: BackupConfig,
    ) -> BackupEngine<InMemoryRecordStore, InMemoryMetadataStore, MemoryStorage> {
        let records = InMemoryRecordStore::new().with_collection("users", vec![json!({"_id": 1})]);
        BackupEngine::new(
            config,
            Arc::new(records),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(MemoryStorage::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BackupConfig::new(EncryptionKey::generate(), vec![]);
        let result = BackupEngine::new(
            config,
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryMetadataStore::new()),
            Arc::new(MemoryStorage::new()),
        );
        assert!(matches!(result, Err(ArchivistError::Config(_))));
    }

    #[test]
    fn test_stats() {
        let engine = engine(BackupConfig::new(EncryptionKey::generate(), vec!["users".into()]));
        assert_eq!(engine.stats().unwrap(), BackupStats::default());

        let first = engine.create_full_backup().unwrap();
        let second = engine.create_full_backup().unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_backups, 2);
        assert_eq!(stats.completed_backups, 2);
        assert_eq!(stats.failed_backups, 0);
        assert_eq!(stats.total_size_bytes, first.size_bytes + second.size_bytes);
        assert_eq!(stats.oldest, Some(first.created_at));
        assert_eq!(stats.newest, Some(second.created_at));
    }

    #[test]
    fn test_apply_retention_policy_uses_max_backups() {
        let engine = engine(
            BackupConfig::new(EncryptionKey::generate(), vec!["users".into()]).with_max_backups(1),
        );
        engine.create_full_backup().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newest = engine.create_full_backup().unwrap();

        let report = engine.apply_retention_policy().unwrap();
        assert_eq!(report.deleted().len(), 1);

        let remaining: Vec<String> = engine.list_backups().unwrap().into_iter().map(|b| b.id).collect();
        assert_eq!(remaining, vec![newest.id]);
    }

    #[test]
    fn test_engine_behind_trait_object() {
        let engine: Box<dyn BackupEngineInterface> =
            Box::new(engine(BackupConfig::new(EncryptionKey::generate(), vec!["users".into()])));

        let backup = engine.create_full_backup().unwrap();
        assert!(engine.verify_backup(&backup.id));
        assert_eq!(engine.list_backups().unwrap().len(), 1);
    }
}

/*!
Backup orchestrator.

Produces full and incremental archives from the record store. Each backup
moves its metadata through `pending -> in_progress -> completed | failed`;
once the `pending` row has been written, every exit path finalizes it.
*/

use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn};

use crate::gate::OperationGate;
use crate::metadata_store::MetadataStore;
use crate::pipeline::{ArchivePipeline, BackupPayload, SealedArchive};
use crate::record_store::{RecordFilter, RecordStore};
use crate::storage::StorageAdapter;
use crate::{ArchivistError, BackupConfig, BackupMetadata, Result};

#[cfg(feature = "metrics")]
use crate::observability::{ArchivistMetrics, Operation, OperationTimer};

/// Creates archives and keeps their metadata consistent
///
/// The orchestrator shares its [`OperationGate`] with the restore side; a
/// backup never runs while another backup or a restore holds the gate.
pub struct BackupOrchestrator<R, M, S>
where
    R: RecordStore,
    M: MetadataStore,
    S: StorageAdapter,
{
    records: Arc<R>,
    metadata: Arc<M>,
    archives: Arc<S>,
    gate: Arc<OperationGate>,
    pipeline: ArchivePipeline,
    collections: Vec<String>,
    modified_field: String,
}

impl<R, M, S> BackupOrchestrator<R, M, S>
where
    R: RecordStore,
    M: MetadataStore,
    S: StorageAdapter,
{
    pub fn new(
        config: &BackupConfig,
        records: Arc<R>,
        metadata: Arc<M>,
        archives: Arc<S>,
        gate: Arc<OperationGate>,
    ) -> Self {
        Self {
            records,
            metadata,
            archives,
            gate,
            pipeline: ArchivePipeline::new(
                config.compression_algorithm,
                config.compression_level,
                config.encryption_key.clone(),
            ),
            collections: config.collections.clone(),
            modified_field: config.modified_field.clone(),
        }
    }

    /// Archive every configured collection in full
    ///
    /// # Returns
    /// The `completed` metadata of the new backup
    ///
    /// # Errors
    /// * `BackupInProgress` / `RestoreInProgress` - the gate is held; nothing is written
    /// * `RecordStore`, `Compression`, `Encryption`, `Storage` - a stage failed;
    ///   the backup's metadata is left `failed` with the error text
    pub fn create_full_backup(&self) -> Result<BackupMetadata> {
        let _lease = self.gate.try_backup()?;

        let metadata =
            BackupMetadata::new_full(self.collections.clone(), self.pipeline.algorithm());
        let span = info_span!("backup", backup_id = %metadata.id, kind = %metadata.kind);
        let _enter = span.enter();

        self.run(metadata, RecordFilter::All)
    }

    /// Archive records modified after a completed base backup started
    ///
    /// The lower bound is the base's `created_at`; the comparison is strict.
    ///
    /// # Errors
    /// * `MetadataNotFound` - no metadata for `base_backup_id`
    /// * `BaseBackupNotCompleted` - the base exists but is not `completed`
    /// * otherwise as [`create_full_backup`](Self::create_full_backup)
    pub fn create_incremental_backup(&self, base_backup_id: &str) -> Result<BackupMetadata> {
        let _lease = self.gate.try_backup()?;

        let base = self
            .metadata
            .get(base_backup_id)?
            .ok_or_else(|| ArchivistError::MetadataNotFound(base_backup_id.to_string()))?;
        if !base.is_completed() {
            return Err(ArchivistError::BaseBackupNotCompleted {
                id: base.id,
                status: base.status.to_string(),
            });
        }

        let metadata = BackupMetadata::new_incremental(
            base.id.clone(),
            self.collections.clone(),
            self.pipeline.algorithm(),
        );
        let span = info_span!(
            "backup",
            backup_id = %metadata.id,
            kind = %metadata.kind,
            base_backup_id = %base.id
        );
        let _enter = span.enter();

        let filter = RecordFilter::modified_after(self.modified_field.clone(), base.created_at);
        self.run(metadata, filter)
    }

    fn run(&self, mut metadata: BackupMetadata, filter: RecordFilter) -> Result<BackupMetadata> {
        #[cfg(feature = "metrics")]
        let timer = OperationTimer::start(Operation::Backup);

        // no archive is written unless the pending row is durable
        self.metadata.put(&metadata)?;

        let outcome = self.advance(&mut metadata, &filter);
        let outcome = match outcome {
            Ok(()) => Ok(metadata),
            Err(e) => {
                self.finalize_failed(&mut metadata, &e);
                Err(e)
            }
        };

        #[cfg(feature = "metrics")]
        timer.finish(&outcome);

        outcome
    }

    fn advance(&self, metadata: &mut BackupMetadata, filter: &RecordFilter) -> Result<()> {
        metadata.mark_in_progress()?;
        self.metadata.put(metadata)?;
        info!("Backup started");

        let payload = self.export(filter)?;
        let sealed = self.pipeline.seal(&payload)?;
        self.archives.save(&sealed.bytes, &metadata.archive_name())?;

        let mut completed = metadata.clone();
        completed.mark_completed(sealed.size_bytes(), sealed.checksum.clone())?;
        self.metadata.put(&completed)?;
        *metadata = completed;

        self.log_completed(metadata, &sealed, payload.record_count());
        Ok(())
    }

    fn export(&self, filter: &RecordFilter) -> Result<BackupPayload> {
        let mut payload = BackupPayload::new();
        for collection in &self.collections {
            let records = self.records.find(collection, filter)?;
            debug!(collection = %collection, records = records.len(), "Collection exported");
            payload.insert(collection.clone(), records);
        }
        Ok(payload)
    }

    fn log_completed(&self, metadata: &BackupMetadata, sealed: &SealedArchive, records: usize) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = ArchivistMetrics::global() {
                metrics.record_archive_size(sealed.size_bytes());
            }
        }

        info!(
            size_bytes = sealed.size_bytes(),
            records,
            checksum = %metadata.checksum,
            "Backup completed"
        );
    }

    fn finalize_failed(&self, metadata: &mut BackupMetadata, cause: &ArchivistError) {
        if let Err(e) = metadata.mark_failed(cause.to_string()) {
            warn!(error = %e, "Backup metadata could not be marked failed");
            return;
        }
        match self.metadata.put(metadata) {
            Ok(()) => error!(error = %cause, "Backup failed"),
            Err(put_error) => error!(
                error = %cause,
                metadata_error = %put_error,
                "Backup failed and its failed status could not be recorded"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::EncryptionKey;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::record_store::{InMemoryRecordStore, MockRecordStore};
    use crate::storage::MemoryStorage;
    use crate::{BackupKind, BackupStatus};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn config() -> BackupConfig {
        BackupConfig::new(
            EncryptionKey::generate(),
            vec!["users".to_string(), "orders".to_string()],
        )
    }

    fn orchestrator<R: RecordStore>(
        records: R,
    ) -> (
        BackupOrchestrator<R, InMemoryMetadataStore, MemoryStorage>,
        Arc<InMemoryMetadataStore>,
        Arc<MemoryStorage>,
        Arc<OperationGate>,
    ) {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let archives = Arc::new(MemoryStorage::new());
        let gate = Arc::new(OperationGate::new());
        let orchestrator = BackupOrchestrator::new(
            &config(),
            Arc::new(records),
            Arc::clone(&metadata),
            Arc::clone(&archives),
            Arc::clone(&gate),
        );
        (orchestrator, metadata, archives, gate)
    }

    #[test]
    fn test_full_backup_completes() {
        let records = InMemoryRecordStore::new()
            .with_collection("users", vec![json!({"_id": 1}), json!({"_id": 2})])
            .with_collection("orders", vec![json!({"_id": "o-1"})]);
        let (orchestrator, metadata_store, archives, _) = orchestrator(records);

        let metadata = orchestrator.create_full_backup().unwrap();

        assert_eq!(metadata.status, BackupStatus::Completed);
        assert_eq!(metadata.kind, BackupKind::Full);
        assert!(metadata.size_bytes > 0);
        assert_eq!(metadata.checksum.len(), 64);
        assert!(archives.exists(&metadata.archive_name()));
        assert_eq!(metadata_store.get(&metadata.id).unwrap(), Some(metadata));
    }

    #[test]
    fn test_export_failure_marks_backup_failed() {
        let mut records = MockRecordStore::new();
        records
            .expect_find()
            .returning(|_, _| Err(ArchivistError::record_store("connection reset")));
        let (orchestrator, metadata_store, archives, gate) = orchestrator(records);

        let err = orchestrator.create_full_backup().unwrap_err();
        assert!(matches!(err, ArchivistError::RecordStore(_)));

        let rows = metadata_store.list().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, BackupStatus::Failed);
        assert!(rows[0].error.as_deref().unwrap().contains("connection reset"));
        assert!(archives.is_empty());
        assert_eq!(gate.state(), crate::gate::GateState::Idle);
    }

    #[test]
    fn test_backup_rejected_while_gate_held() {
        let (orchestrator, metadata_store, archives, gate) =
            orchestrator(InMemoryRecordStore::new());

        let lease = gate.try_backup().unwrap();
        assert!(matches!(
            orchestrator.create_full_backup(),
            Err(ArchivistError::BackupInProgress)
        ));
        drop(lease);

        let _restore = gate.try_restore().unwrap();
        assert!(matches!(
            orchestrator.create_full_backup(),
            Err(ArchivistError::RestoreInProgress)
        ));

        assert!(metadata_store.list().unwrap().is_empty());
        assert!(archives.is_empty());
    }

    #[test]
    fn test_incremental_requires_completed_base() {
        let (orchestrator, metadata_store, _, _) = orchestrator(InMemoryRecordStore::new());

        assert!(matches!(
            orchestrator.create_incremental_backup("missing"),
            Err(ArchivistError::MetadataNotFound(id)) if id == "missing"
        ));

        let mut failed = BackupMetadata::new_full(vec!["users".to_string()], Default::default());
        failed.mark_failed("boom").unwrap();
        metadata_store.put(&failed).unwrap();

        assert!(matches!(
            orchestrator.create_incremental_backup(&failed.id),
            Err(ArchivistError::BaseBackupNotCompleted { .. })
        ));
        // no row is created for a rejected incremental
        assert_eq!(metadata_store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_incremental_exports_only_newer_records() {
        let base_time = Utc::now() - Duration::hours(1);
        let records = InMemoryRecordStore::new()
            .with_collection(
                "users",
                vec![
                    json!({"_id": 1, "updatedAt": (base_time - Duration::minutes(5)).to_rfc3339()}),
                    json!({"_id": 2, "updatedAt": (base_time + Duration::minutes(5)).to_rfc3339()}),
                ],
            )
            .with_collection("orders", vec![]);
        let (orchestrator, metadata_store, _, _) = orchestrator(records);

        let mut base = BackupMetadata::new_full(
            vec!["users".to_string(), "orders".to_string()],
            Default::default(),
        )
        .with_created_at(base_time);
        base.mark_in_progress().unwrap();
        base.mark_completed(1, "digest").unwrap();
        metadata_store.put(&base).unwrap();

        let incremental = orchestrator.create_incremental_backup(&base.id).unwrap();
        assert_eq!(incremental.kind, BackupKind::Incremental);
        assert_eq!(incremental.base_backup_id.as_deref(), Some(base.id.as_str()));
        assert_eq!(incremental.status, BackupStatus::Completed);
    }

    #[test]
    fn test_storage_failure_marks_backup_failed() {
        struct BrokenStorage;
        impl StorageAdapter for BrokenStorage {
            fn save(&self, _: &[u8], _: &str) -> Result<()> {
                Err(ArchivistError::storage("disk full"))
            }
            fn load(&self, key: &str) -> Result<Vec<u8>> {
                Err(ArchivistError::storage(format!("missing {key}")))
            }
            fn exists(&self, _: &str) -> bool {
                false
            }
            fn delete(&self, _: &str) -> Result<()> {
                Ok(())
            }
        }

        let metadata_store = Arc::new(InMemoryMetadataStore::new());
        let orchestrator = BackupOrchestrator::new(
            &config(),
            Arc::new(InMemoryRecordStore::new()),
            Arc::clone(&metadata_store),
            Arc::new(BrokenStorage),
            Arc::new(OperationGate::new()),
        );

        assert!(matches!(
            orchestrator.create_full_backup(),
            Err(ArchivistError::Storage(_))
        ));
        let rows = metadata_store.list().unwrap();
        assert_eq!(rows[0].status, BackupStatus::Failed);
        assert_eq!(rows[0].error.as_deref(), Some("Storage error: disk full"));
    }
}

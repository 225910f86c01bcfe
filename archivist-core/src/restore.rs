/*!
Restore orchestrator.

A restore runs the backward pipeline for every archive it needs before it
touches the record store: checksum, decrypt, decompress, decode, and (when
asked) structural validation. Incremental backups are restored by replaying
their chain on top of the nearest full backup.
*/

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::gate::OperationGate;
use crate::metadata_store::MetadataStore;
use crate::pipeline::{into_payload, validate_payload, ArchivePipeline, BackupPayload};
use crate::record_store::RecordStore;
use crate::storage::StorageAdapter;
use crate::{ArchivistError, BackupConfig, BackupKind, BackupMetadata, Result};

#[cfg(feature = "metrics")]
use crate::observability::{Operation, OperationTimer};

/// Options accepted by [`RestoreOrchestrator::restore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Restrict the import to these collections; `None` restores all of them
    pub collections: Option<Vec<String>>,
    /// Check the payload shape against the metadata before importing
    pub validate_data: bool,
}

impl RestoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections = Some(collections.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_validation(mut self, validate_data: bool) -> Self {
        self.validate_data = validate_data;
        self
    }
}

/// What a successful restore did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// The backup that was requested
    pub backup_id: String,
    /// Backups applied, oldest (the full backup) first
    pub chain: Vec<String>,
    /// Records written per collection
    pub restored: BTreeMap<String, usize>,
    /// Requested collections absent from the archive
    pub skipped: Vec<String>,
}

impl RestoreReport {
    pub fn total_records(&self) -> usize {
        self.restored.values().sum()
    }
}

/// Reads archives back into the record store
pub struct RestoreOrchestrator<R, M, S>
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
    record_id_field: String,
}

impl<R, M, S> RestoreOrchestrator<R, M, S>
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
            record_id_field: config.record_id_field.clone(),
        }
    }

    /// Restore a backup into the record store
    ///
    /// Every archive in the chain is loaded and verified before any
    /// collection is replaced, so a corrupt ancestor aborts the restore
    /// without touching the store. Each restored collection is replaced
    /// wholesale via [`RecordStore::replace_collection`].
    ///
    /// # Errors
    /// * `RestoreInProgress` / `BackupInProgress` - the gate is held
    /// * `MetadataNotFound` - the backup or one of its ancestors is unknown
    /// * `BaseBackupNotCompleted` - a backup in the chain is not `completed`
    /// * `ChecksumMismatch` - archive bytes differ from the recorded digest
    /// * `Authentication` - wrong key or tampered ciphertext
    /// * `Decompression` / `InvalidFormat` - the plaintext is not a valid payload
    /// * `Validation` - `validate_data` was set and the payload shape is wrong
    /// * `RecordStore` - the import failed; earlier collections stay restored.
    ///   With the provided [`RecordStore::replace_collection`] the failing
    ///   collection may be left empty, since its delete already ran.
    pub fn restore(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let _lease = self.gate.try_restore()?;

        let span = info_span!("restore", backup_id = %backup_id);
        let _enter = span.enter();

        #[cfg(feature = "metrics")]
        let timer = OperationTimer::start(Operation::Restore);

        let outcome = self.run(backup_id, options);
        if let Err(e) = &outcome {
            warn!(error = %e, "Restore failed");
        }

        #[cfg(feature = "metrics")]
        timer.finish(&outcome);

        outcome
    }

    fn run(&self, backup_id: &str, options: &RestoreOptions) -> Result<RestoreReport> {
        let chain = self.resolve_chain(backup_id)?;

        let mut merged: Option<BackupPayload> = None;
        for metadata in &chain {
            let payload = self.open(metadata, options.validate_data)?;
            merged = Some(match merged.take() {
                Some(mut base) => {
                    base.overlay(payload, &self.record_id_field);
                    base
                }
                None => payload,
            });
        }
        let mut payload = merged.unwrap_or_default();

        let requested: Vec<String> = match &options.collections {
            Some(subset) => subset.clone(),
            None => payload.collection_names().map(String::from).collect(),
        };

        let mut restored = BTreeMap::new();
        let mut skipped = Vec::new();
        for collection in requested {
            let Some(records) = payload.remove(&collection) else {
                debug!(collection = %collection, "Collection not in archive, skipped");
                skipped.push(collection);
                continue;
            };
            let written = self.records.replace_collection(&collection, records)?;
            debug!(collection = %collection, records = written, "Collection restored");
            restored.insert(collection, written);
        }

        let report = RestoreReport {
            backup_id: backup_id.to_string(),
            chain: chain.into_iter().map(|m| m.id).collect(),
            restored,
            skipped,
        };
        info!(
            chain_length = report.chain.len(),
            records = report.total_records(),
            skipped = report.skipped.len(),
            "Restore completed"
        );
        Ok(report)
    }

    /// Check that a backup's archive is intact and decryptable
    ///
    /// Runs the backward pipeline through decompression for this archive
    /// only; nothing is imported. Any failure is logged and reported as
    /// `false`.
    pub fn verify_backup(&self, backup_id: &str) -> bool {
        #[cfg(feature = "metrics")]
        let timer = OperationTimer::start(Operation::Verify);

        let outcome = self.verify(backup_id);

        #[cfg(feature = "metrics")]
        timer.finish(&outcome);

        match outcome {
            Ok(()) => {
                debug!(backup_id = %backup_id, "Backup verified");
                true
            }
            Err(e) => {
                warn!(backup_id = %backup_id, error = %e, "Backup verification failed");
                false
            }
        }
    }

    fn verify(&self, backup_id: &str) -> Result<()> {
        let metadata = self.load_metadata(backup_id)?;
        let bytes = self.archives.load(&metadata.archive_name())?;
        self.pipeline.open_raw(&bytes, &metadata)?;
        Ok(())
    }

    fn load_metadata(&self, backup_id: &str) -> Result<BackupMetadata> {
        self.metadata
            .get(backup_id)?
            .ok_or_else(|| ArchivistError::MetadataNotFound(backup_id.to_string()))
    }

    /// Metadata from the nearest full backup up to `backup_id`, oldest first
    fn resolve_chain(&self, backup_id: &str) -> Result<Vec<BackupMetadata>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(backup_id.to_string());

        while let Some(id) = next.take() {
            if !seen.insert(id.clone()) {
                return Err(ArchivistError::invalid_format(format!(
                    "Backup chain of {backup_id} loops at {id}"
                )));
            }

            let metadata = self.load_metadata(&id)?;
            if !metadata.is_completed() {
                return Err(ArchivistError::BaseBackupNotCompleted {
                    id: metadata.id,
                    status: metadata.status.to_string(),
                });
            }

            next = match metadata.kind {
                BackupKind::Full => None,
                BackupKind::Incremental => Some(metadata.base_backup_id.clone().ok_or_else(|| {
                    ArchivistError::invalid_format(format!(
                        "Incremental backup {} has no base backup",
                        metadata.id
                    ))
                })?),
            };
            chain.push(metadata);
        }

        chain.reverse();
        Ok(chain)
    }

    fn open(&self, metadata: &BackupMetadata, validate_data: bool) -> Result<BackupPayload> {
        let bytes = self.archives.load(&metadata.archive_name())?;
        let raw = self.pipeline.open_raw(&bytes, metadata)?;
        if validate_data {
            validate_payload(&raw, metadata)?;
        }
        into_payload(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupOrchestrator;
    use crate::encryption::EncryptionKey;
    use crate::metadata_store::InMemoryMetadataStore;
    use crate::record_store::InMemoryRecordStore;
    use crate::storage::MemoryStorage;
    use crate::BackupStatus;
    use serde_json::json;

    struct Fixture {
        records: Arc<InMemoryRecordStore>,
        metadata: Arc<InMemoryMetadataStore>,
        archives: Arc<MemoryStorage>,
        gate: Arc<OperationGate>,
        backup: BackupOrchestrator<InMemoryRecordStore, InMemoryMetadataStore, MemoryStorage>,
        restore: RestoreOrchestrator<InMemoryRecordStore, InMemoryMetadataStore, MemoryStorage>,
    }

    fn fixture() -> Fixture {
        let config = BackupConfig::new(
            EncryptionKey::generate(),
            vec!["users".to_string(), "orders".to_string()],
        );
        let records = Arc::new(
            InMemoryRecordStore::new()
                .with_collection("users", vec![json!({"_id": 1}), json!({"_id": 2})])
                .with_collection("orders", vec![json!({"_id": "o-1"})]),
        );
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let archives = Arc::new(MemoryStorage::new());
        let gate = Arc::new(OperationGate::new());

        Fixture {
            backup: BackupOrchestrator::new(
                &config,
                Arc::clone(&records),
                Arc::clone(&metadata),
                Arc::clone(&archives),
                Arc::clone(&gate),
            ),
            restore: RestoreOrchestrator::new(
                &config,
                Arc::clone(&records),
                Arc::clone(&metadata),
                Arc::clone(&archives),
                Arc::clone(&gate),
            ),
            records,
            metadata,
            archives,
            gate,
        }
    }

    #[test]
    fn test_restore_subset_reports_skipped() {
        let f = fixture();
        let backup = f.backup.create_full_backup().unwrap();

        f.records.replace_collection("users", vec![]).unwrap();
        f.records.replace_collection("orders", vec![]).unwrap();

        let report = f
            .restore
            .restore(
                &backup.id,
                &RestoreOptions::new().with_collections(["users", "invoices"]),
            )
            .unwrap();

        assert_eq!(report.chain, vec![backup.id.clone()]);
        assert_eq!(report.restored.get("users"), Some(&2));
        assert_eq!(report.skipped, vec!["invoices".to_string()]);
        assert_eq!(f.records.count("users"), 2);
        // not requested
        assert_eq!(f.records.count("orders"), 0);
    }

    #[test]
    fn test_restore_rejected_while_gate_held() {
        let f = fixture();
        let backup = f.backup.create_full_backup().unwrap();

        let _lease = f.gate.try_backup().unwrap();
        assert!(matches!(
            f.restore.restore(&backup.id, &RestoreOptions::new()),
            Err(ArchivistError::BackupInProgress)
        ));
    }

    #[test]
    fn test_restore_unknown_backup() {
        let f = fixture();
        assert!(matches!(
            f.restore.restore("nope", &RestoreOptions::new()),
            Err(ArchivistError::MetadataNotFound(_))
        ));
        assert!(!f.restore.verify_backup("nope"));
    }

    #[test]
    fn test_restore_failed_backup_is_rejected() {
        let f = fixture();
        let mut failed = BackupMetadata::new_full(vec!["users".to_string()], Default::default());
        failed.mark_failed("export failed").unwrap();
        f.metadata.put(&failed).unwrap();

        assert!(matches!(
            f.restore.restore(&failed.id, &RestoreOptions::new()),
            Err(ArchivistError::BaseBackupNotCompleted { status, .. }) if status == "failed"
        ));
    }

    #[test]
    fn test_missing_archive_fails_verification() {
        let f = fixture();
        let backup = f.backup.create_full_backup().unwrap();
        assert!(f.restore.verify_backup(&backup.id));

        f.archives.delete(&backup.archive_name()).unwrap();
        assert!(!f.restore.verify_backup(&backup.id));
    }

    #[test]
    fn test_chain_cycle_is_invalid_format() {
        let f = fixture();
        let mut a = BackupMetadata::new_incremental("b", vec!["users".to_string()], Default::default());
        a.id = "a".to_string();
        a.mark_in_progress().unwrap();
        a.mark_completed(1, "x").unwrap();
        let mut b = a.clone();
        b.id = "b".to_string();
        b.base_backup_id = Some("a".to_string());
        f.metadata.put(&a).unwrap();
        f.metadata.put(&b).unwrap();

        assert!(matches!(
            f.restore.restore("a", &RestoreOptions::new()),
            Err(ArchivistError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_chain_with_missing_ancestor() {
        let f = fixture();
        let mut orphan =
            BackupMetadata::new_incremental("gone", vec!["users".to_string()], Default::default());
        orphan.mark_in_progress().unwrap();
        orphan.mark_completed(1, "x").unwrap();
        f.metadata.put(&orphan).unwrap();

        assert!(matches!(
            f.restore.restore(&orphan.id, &RestoreOptions::new()),
            Err(ArchivistError::MetadataNotFound(id)) if id == "gone"
        ));
        assert_eq!(orphan.status, BackupStatus::Completed);
    }
}

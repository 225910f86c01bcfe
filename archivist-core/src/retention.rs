/*!
Retention sweeps over terminal backups.

Only `completed` and `failed` backups are ever removed. For each expired
backup the archive is deleted before its metadata, so a failure part way
leaves the metadata in place for the next sweep to retry. One failed item
never stops the sweep.

An incremental chain is pruned as a unit: a backup that some kept backup
resolves through (its `base_backup_id`, transitively) is never deleted, even
when it is past the cutoff or beyond `max_backups`. Such backups are reported
as [`RetentionStatus::Protected`] and are reconsidered on every sweep, so the
whole chain goes once its newest member expires.
*/

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::metadata_store::MetadataStore;
use crate::storage::StorageAdapter;
use crate::{ArchivistError, BackupMetadata, Result};

#[cfg(feature = "metrics")]
use crate::observability::ArchivistMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionStatus {
    Deleted,
    Failed(String),
    /// Kept because `dependent` still restores through this backup
    Protected { dependent: String },
}

/// Result of retention for one backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionOutcome {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub status: RetentionStatus,
}

/// Per-item outcomes of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub outcomes: Vec<RetentionOutcome>,
}

impl RetentionReport {
    /// Ids of backups that were removed
    pub fn deleted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == RetentionStatus::Deleted)
            .map(|o| o.backup_id.as_str())
            .collect()
    }

    /// Backups that could not be removed, with the error text
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                RetentionStatus::Failed(error) => Some((o.backup_id.as_str(), error.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Selected backups kept as ancestors, with the kept backup that needs each
    pub fn protected(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.status {
                RetentionStatus::Protected { dependent } => {
                    Some((o.backup_id.as_str(), dependent.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Archive bytes reclaimed by deleted backups
    pub fn bytes_freed(&self) -> u64 {
        self.outcomes
            .iter()
            .filter(|o| o.status == RetentionStatus::Deleted)
            .map(|o| o.size_bytes)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Deletes terminal backups by age or by count
pub struct RetentionManager<M, S>
where
    M: MetadataStore,
    S: StorageAdapter,
{
    metadata: Arc<M>,
    archives: Arc<S>,
}

impl<M, S> RetentionManager<M, S>
where
    M: MetadataStore,
    S: StorageAdapter,
{
    pub fn new(metadata: Arc<M>, archives: Arc<S>) -> Self {
        Self { metadata, archives }
    }

    /// Delete terminal backups created more than `retention` ago
    pub fn cleanup_expired(&self, retention: Duration) -> Result<RetentionReport> {
        self.cleanup_expired_at(retention, Utc::now())
    }

    /// [`cleanup_expired`](Self::cleanup_expired) against an explicit clock
    ///
    /// A backup is expired when `created_at < now - retention`. Expired
    /// ancestors of a backup that is kept are reported as protected.
    ///
    /// # Errors
    /// * `Config` - `now - retention` is not a representable timestamp
    /// * the metadata listing failed
    pub fn cleanup_expired_at(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport> {
        let cutoff = now.checked_sub_signed(retention).ok_or_else(|| {
            ArchivistError::config(format!("retention period of {retention} is out of range"))
        })?;
        let backups = self.metadata.list()?;
        let expired: Vec<BackupMetadata> = backups
            .iter()
            .filter(|m| m.is_terminal() && m.created_at < cutoff)
            .cloned()
            .collect();

        let report = self.remove_all(&backups, expired);
        info!(
            cutoff = %cutoff,
            deleted = report.deleted().len(),
            protected = report.protected().len(),
            failed = report.failures().len(),
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Keep only the `max_backups` newest terminal backups
    ///
    /// Older backups that a kept incremental depends on survive as
    /// protected, so more than `max_backups` may remain.
    pub fn enforce_max_backups(&self, max_backups: usize) -> Result<RetentionReport> {
        // list() is newest first
        let backups = self.metadata.list()?;
        let surplus: Vec<BackupMetadata> = backups
            .iter()
            .filter(|m| m.is_terminal())
            .skip(max_backups)
            .cloned()
            .collect();

        let report = self.remove_all(&backups, surplus);
        info!(
            max_backups,
            deleted = report.deleted().len(),
            protected = report.protected().len(),
            failed = report.failures().len(),
            "Backup count enforced"
        );
        Ok(report)
    }

    fn remove_all(&self, all: &[BackupMetadata], selected: Vec<BackupMetadata>) -> RetentionReport {
        let needed_by = kept_ancestors(all, &selected);
        let outcomes: Vec<RetentionOutcome> = selected
            .into_iter()
            .map(|metadata| {
                if let Some(dependent) = needed_by.get(&metadata.id) {
                    info!(backup_id = %metadata.id, dependent = %dependent, "Keeping chain ancestor");
                    return RetentionOutcome {
                        status: RetentionStatus::Protected {
                            dependent: dependent.clone(),
                        },
                        backup_id: metadata.id,
                        created_at: metadata.created_at,
                        size_bytes: metadata.size_bytes,
                    };
                }
                let status = match self.remove(&metadata) {
                    Ok(()) => RetentionStatus::Deleted,
                    Err(e) => {
                        warn!(backup_id = %metadata.id, error = %e, "Failed to delete backup");
                        RetentionStatus::Failed(e.to_string())
                    }
                };
                RetentionOutcome {
                    backup_id: metadata.id,
                    created_at: metadata.created_at,
                    size_bytes: metadata.size_bytes,
                    status,
                }
            })
            .collect();
        let report = RetentionReport { outcomes };

        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = ArchivistMetrics::global() {
                metrics.record_retention(report.deleted().len(), report.failures().len());
            }
        }

        report
    }

    fn remove(&self, metadata: &BackupMetadata) -> Result<()> {
        self.archives.delete(&metadata.archive_name())?;
        self.metadata.delete(&metadata.id)
    }
}

/// Map each selected backup that a kept backup's chain passes through to
/// the first such kept backup
fn kept_ancestors(all: &[BackupMetadata], selected: &[BackupMetadata]) -> HashMap<String, String> {
    let selected_ids: HashSet<&str> = selected.iter().map(|m| m.id.as_str()).collect();
    let by_id: HashMap<&str, &BackupMetadata> = all.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut needed_by = HashMap::new();
    for kept in all.iter().filter(|m| !selected_ids.contains(m.id.as_str())) {
        let mut seen = HashSet::new();
        let mut next = kept.base_backup_id.as_deref();
        // stops at a missing ancestor or a cycle
        while let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            if selected_ids.contains(id) {
                needed_by
                    .entry(id.to_string())
                    .or_insert_with(|| kept.id.clone());
            }
            next = by_id.get(id).and_then(|m| m.base_backup_id.as_deref());
        }
    }
    needed_by
}

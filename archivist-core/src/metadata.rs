/*!
Backup metadata schema and status lifecycle.
*/

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{compression::CompressionAlgorithm, ArchivistError, Result};

/// File extension used for archive blobs
pub const ARCHIVE_EXTENSION: &str = "bak";

/// Whether a backup captures whole collections or only changed records
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Incremental => f.write_str("incremental"),
        }
    }
}

/// Lifecycle of a backup: `pending -> in_progress -> completed | failed`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    /// Completed and failed backups never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn can_transition_to(&self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One record per archive, immutable once it reaches a terminal status
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// Unique identifier, generated when the backup starts
    pub id: String,

    pub kind: BackupKind,

    /// When the backup started; incremental exports use it as their lower bound
    pub created_at: DateTime<Utc>,

    /// Collections included, in configured order
    pub collections: Vec<String>,

    /// Size of the final (compressed + encrypted) archive
    pub size_bytes: u64,

    /// SHA-256 of the final archive bytes
    pub checksum: String,

    pub compression_algorithm: CompressionAlgorithm,

    pub encrypted: bool,

    pub status: BackupStatus,

    /// Present only when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Present only for incremental backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backup_id: Option<String>,
}

impl BackupMetadata {
    /// Create `pending` metadata for a new full backup
    ///
    /// # Example
    /// ```rust
    /// use archivist_core::{BackupMetadata, BackupStatus, CompressionAlgorithm};
    ///
    /// let metadata = BackupMetadata::new_full(vec!["users".into()], CompressionAlgorithm::Gzip);
    /// assert_eq!(metadata.status, BackupStatus::Pending);
    /// assert!(metadata.encrypted);
    /// ```
    pub fn new_full(collections: Vec<String>, compression_algorithm: CompressionAlgorithm) -> Self {
        Self::new(BackupKind::Full, collections, compression_algorithm, None)
    }

    /// Create `pending` metadata for an incremental backup relative to `base_backup_id`
    pub fn new_incremental<S: Into<String>>(
        base_backup_id: S,
        collections: Vec<String>,
        compression_algorithm: CompressionAlgorithm,
    ) -> Self {
        Self::new(
            BackupKind::Incremental,
            collections,
            compression_algorithm,
            Some(base_backup_id.into()),
        )
    }

    fn new(
        kind: BackupKind,
        collections: Vec<String>,
        compression_algorithm: CompressionAlgorithm,
        base_backup_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            created_at: Utc::now(),
            collections,
            size_bytes: 0,
            checksum: String::new(), // set once the archive is sealed
            compression_algorithm,
            encrypted: true,
            status: BackupStatus::Pending,
            error: None,
            base_backup_id,
        }
    }

    /// Override the creation timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    fn transition(&mut self, next: BackupStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ArchivistError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// `pending -> in_progress`
    pub fn mark_in_progress(&mut self) -> Result<()> {
        self.transition(BackupStatus::InProgress)
    }

    /// `in_progress -> completed`, recording the sealed archive's size and digest
    pub fn mark_completed<S: Into<String>>(&mut self, size_bytes: u64, checksum: S) -> Result<()> {
        self.transition(BackupStatus::Completed)?;
        self.size_bytes = size_bytes;
        self.checksum = checksum.into();
        self.error = None;
        Ok(())
    }

    /// `pending | in_progress -> failed`
    pub fn mark_failed<S: Into<String>>(&mut self, error: S) -> Result<()> {
        self.transition(BackupStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.status == BackupStatus::Completed
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Storage key of the archive blob for this backup
    pub fn archive_name(&self) -> String {
        archive_name(&self.id)
    }

    /// Check field consistency for the current status
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(ArchivistError::validation("id cannot be empty"));
        }
        if self.collections.is_empty() {
            return Err(ArchivistError::validation("collections cannot be empty"));
        }
        match (self.kind, &self.base_backup_id) {
            (BackupKind::Incremental, None) => {
                return Err(ArchivistError::validation(
                    "incremental backup requires baseBackupId",
                ))
            }
            (BackupKind::Full, Some(_)) => {
                return Err(ArchivistError::validation(
                    "full backup cannot carry baseBackupId",
                ))
            }
            _ => {}
        }
        if self.is_completed() && (self.checksum.is_empty() || self.size_bytes == 0) {
            return Err(ArchivistError::validation(
                "completed backup requires checksum and non-zero size",
            ));
        }
        if self.error.is_some() && self.status != BackupStatus::Failed {
            return Err(ArchivistError::validation(
                "error is only allowed on failed backups",
            ));
        }
        Ok(())
    }
}

/// Storage key of the archive blob for a backup id
pub fn archive_name(backup_id: &str) -> String {
    format!("{backup_id}.{ARCHIVE_EXTENSION}")
}

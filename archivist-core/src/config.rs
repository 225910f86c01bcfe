//! Configuration for the backup engine
//!
//! `BackupConfig` enumerates every recognized option. It is read once at
//! startup (from the environment or a JSON file), validated once, and then
//! handed to the engine; nothing re-reads it afterwards.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Duration;
use cron::Schedule as CronSchedule;
use serde::Deserialize;

use crate::compression::{CompressionAlgorithm, DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL};
use crate::encryption::EncryptionKey;
use crate::{ArchivistError, Result};

pub const DEFAULT_ARCHIVE_DIR: &str = "backups";
pub const DEFAULT_RETENTION_DAYS: u32 = 7;
/// Upper bound on `retention_days` (about a century)
pub const MAX_RETENTION_DAYS: u32 = 36_500;
pub const DEFAULT_FULL_SCHEDULE: &str = "0 0 * * *";
pub const DEFAULT_INCREMENTAL_SCHEDULE: &str = "0 */6 * * *";
pub const DEFAULT_MODIFIED_FIELD: &str = "updatedAt";
pub const DEFAULT_RECORD_ID_FIELD: &str = "_id";

/// Cron expressions handed to the external scheduler
///
/// The engine never interprets these beyond shape validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_full_schedule")]
    pub full: String,
    #[serde(default = "default_incremental_schedule")]
    pub incremental: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full: default_full_schedule(),
            incremental: default_incremental_schedule(),
        }
    }
}

fn default_full_schedule() -> String {
    DEFAULT_FULL_SCHEDULE.to_string()
}

fn default_incremental_schedule() -> String {
    DEFAULT_INCREMENTAL_SCHEDULE.to_string()
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARCHIVE_DIR)
}

fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

fn default_modified_field() -> String {
    DEFAULT_MODIFIED_FIELD.to_string()
}

fn default_record_id_field() -> String {
    DEFAULT_RECORD_ID_FIELD.to_string()
}

/// Every option the engine recognizes
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Root directory for archives; metadata lives in `<archive_dir>/metadata`
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Age after which terminal backups are deleted
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Keep at most this many terminal backups, if set
    #[serde(default)]
    pub max_backups: Option<usize>,

    #[serde(default)]
    pub compression_algorithm: CompressionAlgorithm,

    /// 0-9
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// 32-byte AES key as 64 hex characters; never logged or persisted
    pub encryption_key: EncryptionKey,

    /// Collections exported by every backup, in archive order
    pub collections: Vec<String>,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Record field holding the modification time used by incremental exports
    #[serde(default = "default_modified_field")]
    pub modified_field: String,

    /// Record field used to match records when merging an incremental chain
    #[serde(default = "default_record_id_field")]
    pub record_id_field: String,
}

impl BackupConfig {
    /// Build a configuration with defaults for everything but the key and collections
    pub fn new(encryption_key: EncryptionKey, collections: Vec<String>) -> Self {
        Self {
            archive_dir: default_archive_dir(),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_backups: None,
            compression_algorithm: CompressionAlgorithm::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            encryption_key,
            collections,
            schedule: ScheduleConfig::default(),
            modified_field: default_modified_field(),
            record_id_field: default_record_id_field(),
        }
    }

    pub fn with_archive_dir<P: AsRef<Path>>(mut self, archive_dir: P) -> Self {
        self.archive_dir = archive_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_compression(mut self, algorithm: CompressionAlgorithm, level: u32) -> Self {
        self.compression_algorithm = algorithm;
        self.compression_level = level;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = Some(max_backups);
        self
    }

    /// Load from the process environment
    ///
    /// | variable | option |
    /// |---|---|
    /// | `BACKUP_DIR` | `archive_dir` |
    /// | `BACKUP_RETENTION_DAYS` | `retention_days` |
    /// | `BACKUP_MAX_BACKUPS` | `max_backups` |
    /// | `BACKUP_COMPRESSION_ALGORITHM` | `compression_algorithm` |
    /// | `BACKUP_COMPRESSION_LEVEL` | `compression_level` |
    /// | `BACKUP_ENCRYPTION_KEY` | `encryption_key` (required) |
    /// | `BACKUP_COLLECTIONS` | `collections`, comma separated (required) |
    /// | `BACKUP_SCHEDULE_FULL` | `schedule.full` |
    /// | `BACKUP_SCHEDULE_INCREMENTAL` | `schedule.incremental` |
    /// | `BACKUP_MODIFIED_FIELD` | `modified_field` |
    /// | `BACKUP_RECORD_ID_FIELD` | `record_id_field` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup (the environment, a map in tests, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = lookup("BACKUP_ENCRYPTION_KEY")
            .ok_or_else(|| ArchivistError::config("BACKUP_ENCRYPTION_KEY is required"))?;
        let collections = lookup("BACKUP_COLLECTIONS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let mut config = Self::new(EncryptionKey::from_hex(&key)?, collections);

        if let Some(dir) = lookup("BACKUP_DIR") {
            config.archive_dir = PathBuf::from(dir);
        }
        if let Some(days) = lookup("BACKUP_RETENTION_DAYS") {
            config.retention_days = parse_number("BACKUP_RETENTION_DAYS", &days)?;
        }
        if let Some(max) = lookup("BACKUP_MAX_BACKUPS") {
            config.max_backups = Some(parse_number("BACKUP_MAX_BACKUPS", &max)?);
        }
        if let Some(algorithm) = lookup("BACKUP_COMPRESSION_ALGORITHM") {
            config.compression_algorithm = algorithm.parse()?;
        }
        if let Some(level) = lookup("BACKUP_COMPRESSION_LEVEL") {
            config.compression_level = parse_number("BACKUP_COMPRESSION_LEVEL", &level)?;
        }
        if let Some(full) = lookup("BACKUP_SCHEDULE_FULL") {
            config.schedule.full = full;
        }
        if let Some(incremental) = lookup("BACKUP_SCHEDULE_INCREMENTAL") {
            config.schedule.incremental = incremental;
        }
        if let Some(field) = lookup("BACKUP_MODIFIED_FIELD") {
            config.modified_field = field;
        }
        if let Some(field) = lookup("BACKUP_RECORD_ID_FIELD") {
            config.record_id_field = field;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file with camelCase keys
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|e| {
            ArchivistError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Retention period as a duration, capped at `MAX_RETENTION_DAYS`
    pub fn retention_period(&self) -> Duration {
        Duration::days(i64::from(self.retention_days.min(MAX_RETENTION_DAYS)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            return Err(ArchivistError::config("at least one collection is required"));
        }
        let mut seen = HashSet::new();
        for name in &self.collections {
            if name.trim().is_empty() {
                return Err(ArchivistError::config("collection names cannot be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(ArchivistError::config(format!(
                    "duplicate collection name: {name}"
                )));
            }
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(ArchivistError::config(format!(
                "compression level must be between 0 and {MAX_COMPRESSION_LEVEL}, got {}",
                self.compression_level
            )));
        }
        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ArchivistError::config(format!(
                "retention period must be between 1 and {MAX_RETENTION_DAYS} days, got {}",
                self.retention_days
            )));
        }
        if self.max_backups == Some(0) {
            return Err(ArchivistError::config("max backups must be at least one"));
        }
        validate_cron("schedule.full", &self.schedule.full)?;
        validate_cron("schedule.incremental", &self.schedule.incremental)?;
        if self.modified_field.is_empty() || self.record_id_field.is_empty() {
            return Err(ArchivistError::config("record field names cannot be empty"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ArchivistError::config(format!("{name} must be a non-negative integer, got {raw:?}")))
}

/// Parse a 5-field cron expression (`min hour day month weekday`)
///
/// The `cron` crate expects a leading seconds field, so `0` is prepended.
/// Weekdays follow that crate: `1-7` starting on Sunday, or `Mon`..`Sun`.
fn validate_cron(name: &str, expression: &str) -> Result<()> {
    let fields = expression.split_whitespace().count();
    if fields != 5 {
        return Err(ArchivistError::config(format!(
            "{name} must be a 5-field cron expression, got {expression:?}"
        )));
    }
    CronSchedule::from_str(&format!("0 {}", expression.trim())).map_err(|e| {
        ArchivistError::config(format!("{name} is not a valid cron expression ({expression:?}): {e}"))
    })?;
    Ok(())
}

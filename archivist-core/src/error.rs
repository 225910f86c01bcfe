/*!
Error types for the Archivist backup engine.
*/

use thiserror::Error;

/// Result type used throughout the Archivist core.
pub type Result<T> = std::result::Result<T, ArchivistError>;

/// Errors that can occur during backup, restore and retention operations.
#[derive(Error, Debug)]
pub enum ArchivistError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A backup already holds the operation gate
    #[error("A backup operation is already in progress")]
    BackupInProgress,

    /// A restore already holds the operation gate
    #[error("A restore operation is already in progress")]
    RestoreInProgress,

    /// No metadata record exists for the given backup id
    #[error("Backup metadata not found: {0}")]
    MetadataNotFound(String),

    /// An incremental base (or chain ancestor) has not completed
    #[error("Backup {id} is not completed (status: {status})")]
    BaseBackupNotCompleted { id: String, status: String },

    /// Archive bytes do not match the recorded checksum
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Authentication tag did not verify; wrong key or tampered archive
    #[error("Authentication failed: wrong key or tampered archive")]
    Authentication,

    /// Cipher setup or sealing failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Malformed compressed stream
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Compression failures
    #[error("Compression error: {0}")]
    Compression(String),

    /// Post-decompression structural check failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// Illegal metadata status transition
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Invalid archive or metadata format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Archive or metadata storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Errors reported by the external record store
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArchivistError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new decompression error
    pub fn decompression<S: Into<String>>(msg: S) -> Self {
        Self::Decompression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new record store error
    pub fn record_store<S: Into<String>>(msg: S) -> Self {
        Self::RecordStore(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// True for the fail-fast exclusion errors raised by the operation gate
    pub fn is_exclusion(&self) -> bool {
        matches!(self, Self::BackupInProgress | Self::RestoreInProgress)
    }
}

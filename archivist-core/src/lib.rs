/*!
# Archivist Core Engine

Encrypted full and incremental backups of record-store collections.

This crate provides:

- Full and incremental backups of configured collections
- Compression (gzip, deflate, brotli) and AES-256-GCM encryption of every archive
- SHA-256 integrity checks before any archive is decrypted
- Restore with optional structural validation and incremental chain replay
- Age- and count-based retention of finished backups

## Architecture

The engine follows hexagonal architecture principles:
- The record store, metadata store, and archive storage are ports (traits)
- Orchestrators hold only the ports and a shared operation gate
- Local filesystem and in-memory adapters are provided

## Usage

```rust
use std::sync::Arc;
use archivist_core::{
    create_local_engine, BackupConfig, EncryptionKey, InMemoryRecordStore, RestoreOptions,
};
use serde_json::json;

let dir = tempfile::tempdir()?;
let records = Arc::new(
    InMemoryRecordStore::new().with_collection("users", vec![json!({"_id": 1})]),
);
let config = BackupConfig::new(EncryptionKey::generate(), vec!["users".into()])
    .with_archive_dir(dir.path());

let engine = create_local_engine(config, Arc::clone(&records))?;
let backup = engine.create_full_backup()?;
assert!(engine.verify_backup(&backup.id));

let report = engine.restore(&backup.id, &RestoreOptions::new().with_validation(true))?;
assert_eq!(report.restored["users"], 1);
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod backup;
pub mod checksum;
pub mod compression;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod gate;
pub mod metadata;
pub mod metadata_store;
pub mod observability;
pub mod pipeline;
pub mod record_store;
pub mod restore;
pub mod retention;
pub mod storage;


pub use backup::BackupOrchestrator;
pub use compression::{
    BrotliCompressor, CompressionAdapter, CompressionAlgorithm, DeflateCompressor, GzipCompressor,
};
pub use config::{BackupConfig, ScheduleConfig};
pub use encryption::EncryptionKey;
pub use engine::{create_local_engine, BackupEngine, BackupEngineInterface, BackupStats};
pub use error::{ArchivistError, Result};
pub use gate::{GateState, OperationGate, OperationLease};
pub use metadata::{BackupKind, BackupMetadata, BackupStatus};
pub use metadata_store::{FileMetadataStore, InMemoryMetadataStore, MetadataStore};
pub use pipeline::BackupPayload;
pub use record_store::{InMemoryRecordStore, Record, RecordFilter, RecordStore};
pub use restore::{RestoreOptions, RestoreOrchestrator, RestoreReport};
pub use retention::{RetentionManager, RetentionOutcome, RetentionReport, RetentionStatus};
pub use storage::{LocalFileStorage, MemoryStorage, StorageAdapter};

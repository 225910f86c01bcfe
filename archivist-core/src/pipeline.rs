/*!
Archive pipeline shared by the backup and restore orchestrators.

Forward: payload -> JSON -> compress -> encrypt -> checksum.
Backward: checksum-verify -> decrypt -> decompress -> JSON -> payload.
Every stage gates the next; nothing is skipped.
*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::checksum::{compute_checksum, verify_checksum};
use crate::compression::CompressionAlgorithm;
use crate::encryption::{self, EncryptionKey};
use crate::record_store::Record;
use crate::{ArchivistError, BackupMetadata, Result};

/// Decompressed archive content: collection name -> ordered records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupPayload {
    collections: BTreeMap<String, Vec<Record>>,
}

impl BackupPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<S: Into<String>>(&mut self, collection: S, records: Vec<Record>) {
        self.collections.insert(collection.into(), records);
    }

    pub fn get(&self, collection: &str) -> Option<&Vec<Record>> {
        self.collections.get(collection)
    }

    pub fn remove(&mut self, collection: &str) -> Option<Vec<Record>> {
        self.collections.remove(collection)
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Overlay a newer partial payload onto this one
    ///
    /// Records in `newer` replace records here with the same `id_field`
    /// value; records without a match (or without an id) are appended.
    pub fn overlay(&mut self, newer: BackupPayload, id_field: &str) {
        for (collection, records) in newer.collections {
            let existing = self.collections.entry(collection).or_default();
            for record in records {
                let position = record.get(id_field).and_then(|id| {
                    existing
                        .iter()
                        .position(|candidate| candidate.get(id_field) == Some(id))
                });
                match position {
                    Some(index) => existing[index] = record,
                    None => existing.push(record),
                }
            }
        }
    }
}

impl From<BTreeMap<String, Vec<Record>>> for BackupPayload {
    fn from(collections: BTreeMap<String, Vec<Record>>) -> Self {
        Self { collections }
    }
}

/// Output of the forward pipeline
#[derive(Debug, Clone)]
pub struct SealedArchive {
    /// Exact bytes to persist
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`
    pub checksum: String,
}

impl SealedArchive {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Stateless transform between payloads and archive bytes
#[derive(Debug, Clone)]
pub struct ArchivePipeline {
    algorithm: CompressionAlgorithm,
    level: u32,
    key: EncryptionKey,
}

impl ArchivePipeline {
    pub fn new(algorithm: CompressionAlgorithm, level: u32, key: EncryptionKey) -> Self {
        Self {
            algorithm,
            level,
            key,
        }
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// compress -> encrypt -> checksum
    pub fn seal(&self, payload: &BackupPayload) -> Result<SealedArchive> {
        let serialized = serde_json::to_vec(payload)?;
        let compressed = self.algorithm.compressor(self.level).compress(&serialized)?;
        let bytes = encryption::encrypt(&compressed, &self.key)?;
        let checksum = compute_checksum(&bytes);

        debug!(
            plain_bytes = serialized.len(),
            compressed_bytes = compressed.len(),
            archive_bytes = bytes.len(),
            algorithm = %self.algorithm,
            "Archive sealed"
        );
        Ok(SealedArchive { bytes, checksum })
    }

    /// checksum-verify -> decrypt -> decompress, returning the raw JSON document
    ///
    /// The decompressor is chosen from `metadata`, never from the bytes.
    pub fn open_raw(&self, bytes: &[u8], metadata: &BackupMetadata) -> Result<Value> {
        verify_checksum(bytes, &metadata.checksum)?;
        let compressed = encryption::decrypt(bytes, &self.key)?;
        let serialized = metadata
            .compression_algorithm
            .compressor(self.level)
            .decompress(&compressed)?;
        serde_json::from_slice(&serialized).map_err(|e| {
            ArchivistError::invalid_format(format!("Archive payload is not valid JSON: {e}"))
        })
    }

    /// Full backward pipeline into a typed payload
    pub fn open(&self, bytes: &[u8], metadata: &BackupMetadata) -> Result<BackupPayload> {
        let raw = self.open_raw(bytes, metadata)?;
        into_payload(raw)
    }
}

/// Decode a raw document into a payload without structural checks
pub fn into_payload(raw: Value) -> Result<BackupPayload> {
    serde_json::from_value(raw).map_err(|e| {
        ArchivistError::invalid_format(format!("Archive payload has unexpected shape: {e}"))
    })
}

/// Structural validation of a decompressed archive document
///
/// Checks that the document is an object of arrays of objects, that every
/// collection listed in `metadata` is present, and that no unlisted
/// collection is present.
pub fn validate_payload(raw: &Value, metadata: &BackupMetadata) -> Result<()> {
    let object = raw
        .as_object()
        .ok_or_else(|| ArchivistError::validation("payload must be a JSON object"))?;

    for (collection, records) in object {
        if !metadata.collections.iter().any(|c| c == collection) {
            return Err(ArchivistError::validation(format!(
                "payload contains unexpected collection {collection}"
            )));
        }
        let records = records.as_array().ok_or_else(|| {
            ArchivistError::validation(format!("collection {collection} is not an array"))
        })?;
        if let Some(index) = records.iter().position(|r| !r.is_object()) {
            return Err(ArchivistError::validation(format!(
                "record {index} of collection {collection} is not an object"
            )));
        }
    }

    if let Some(missing) = metadata
        .collections
        .iter()
        .find(|c| !object.contains_key(c.as_str()))
    {
        return Err(ArchivistError::validation(format!(
            "payload is missing collection {missing}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> BackupPayload {
        let mut payload = BackupPayload::new();
        payload.insert("users", vec![json!({"_id": 1, "name": "ada"})]);
        payload.insert("orders", vec![json!({"_id": "o-1"}), json!({"_id": "o-2"})]);
        payload
    }

    fn sealed_metadata(
        pipeline: &ArchivePipeline,
        sealed: &SealedArchive,
    ) -> BackupMetadata {
        let mut metadata = BackupMetadata::new_full(
            vec!["users".to_string(), "orders".to_string()],
            pipeline.algorithm(),
        );
        metadata.mark_in_progress().unwrap();
        metadata
            .mark_completed(sealed.size_bytes(), sealed.checksum.clone())
            .unwrap();
        metadata
    }

    #[test]
    fn test_seal_open_every_algorithm() {
        for algorithm in [
            CompressionAlgorithm::Gzip,
            CompressionAlgorithm::Deflate,
            CompressionAlgorithm::Brotli,
        ] {
            let pipeline = ArchivePipeline::new(algorithm, 6, EncryptionKey::generate());
            let sealed = pipeline.seal(&payload()).unwrap();
            let metadata = sealed_metadata(&pipeline, &sealed);

            assert_eq!(pipeline.open(&sealed.bytes, &metadata).unwrap(), payload());
        }
    }

    #[test]
    fn test_open_checks_checksum_before_decrypting() {
        let pipeline = ArchivePipeline::new(CompressionAlgorithm::Gzip, 6, EncryptionKey::generate());
        let sealed = pipeline.seal(&payload()).unwrap();
        let metadata = sealed_metadata(&pipeline, &sealed);

        let mut corrupted = sealed.bytes.clone();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;

        assert!(matches!(
            pipeline.open(&corrupted, &metadata),
            Err(ArchivistError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_open_with_wrong_key_fails_authentication() {
        let writer = ArchivePipeline::new(CompressionAlgorithm::Gzip, 6, EncryptionKey::generate());
        let reader = ArchivePipeline::new(CompressionAlgorithm::Gzip, 6, EncryptionKey::generate());
        let sealed = writer.seal(&payload()).unwrap();
        let metadata = sealed_metadata(&writer, &sealed);

        assert!(matches!(
            reader.open(&sealed.bytes, &metadata),
            Err(ArchivistError::Authentication)
        ));
    }

    #[test]
    fn test_algorithm_comes_from_metadata() {
        let key = EncryptionKey::generate();
        let writer = ArchivePipeline::new(CompressionAlgorithm::Brotli, 6, key.clone());
        // reader configured with a different default algorithm
        let reader = ArchivePipeline::new(CompressionAlgorithm::Gzip, 6, key);

        let sealed = writer.seal(&payload()).unwrap();
        let metadata = sealed_metadata(&writer, &sealed);
        assert_eq!(reader.open(&sealed.bytes, &metadata).unwrap(), payload());
    }

    #[test]
    fn test_validate_payload() {
        let pipeline = ArchivePipeline::new(CompressionAlgorithm::Gzip, 6, EncryptionKey::generate());
        let sealed = pipeline.seal(&payload()).unwrap();
        let metadata = sealed_metadata(&pipeline, &sealed);

        assert!(validate_payload(&serde_json::to_value(payload()).unwrap(), &metadata).is_ok());

        let bad_shapes = [
            json!([1, 2, 3]),
            json!({"users": {"not": "an array"}, "orders": []}),
            json!({"users": [1], "orders": []}),
            json!({"users": []}),
            json!({"users": [], "orders": [], "extra": []}),
        ];
        for raw in bad_shapes {
            assert!(
                matches!(validate_payload(&raw, &metadata), Err(ArchivistError::Validation(_))),
                "{raw} should fail validation"
            );
        }
    }

    #[test]
    fn test_overlay_replaces_by_id_and_appends() {
        let mut base = BackupPayload::new();
        base.insert(
            "users",
            vec![json!({"_id": 1, "v": "old"}), json!({"_id": 2, "v": "keep"})],
        );

        let mut newer = BackupPayload::new();
        newer.insert(
            "users",
            vec![json!({"_id": 1, "v": "new"}), json!({"_id": 3, "v": "added"}), json!({"v": "no id"})],
        );
        newer.insert("orders", vec![json!({"_id": "o-9"})]);

        base.overlay(newer, "_id");

        assert_eq!(
            base.get("users").unwrap(),
            &vec![
                json!({"_id": 1, "v": "new"}),
                json!({"_id": 2, "v": "keep"}),
                json!({"_id": 3, "v": "added"}),
                json!({"v": "no id"}),
            ]
        );
        assert_eq!(base.get("orders").unwrap().len(), 1);
        assert_eq!(base.record_count(), 5);
    }
}

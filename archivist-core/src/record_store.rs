/*!
Port to the external record store whose collections are backed up.

The engine only needs three primitives from the store (`find`, `insert_many`,
`delete_many`). `replace_collection` has a delete-then-insert default; stores
that can swap a collection atomically should override it.
*/

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{ArchivistError, Result};

/// A single record as stored in a collection
pub type Record = Value;

/// Query filter understood by the record store
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    /// Every record in the collection
    All,
    /// Records whose `field` holds a modification time strictly after `since`
    ModifiedAfter { field: String, since: DateTime<Utc> },
}

impl RecordFilter {
    pub fn modified_after<S: Into<String>>(field: S, since: DateTime<Utc>) -> Self {
        Self::ModifiedAfter {
            field: field.into(),
            since,
        }
    }

    /// Evaluate the filter against a record
    ///
    /// Modification times may be RFC 3339 strings or integer epoch
    /// milliseconds. Records without a readable timestamp never match
    /// `ModifiedAfter`.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::ModifiedAfter { field, since } => record
                .get(field)
                .and_then(parse_timestamp)
                .is_some_and(|modified| modified > *since),
        }
    }
}

/// Read a modification timestamp from a record field value
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Collaborator interface required from the record store
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore: Send + Sync {
    /// Records of `collection` matching `filter`, in store order
    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Append records to `collection`; returns the number inserted
    fn insert_many(&self, collection: &str, records: Vec<Record>) -> Result<usize>;

    /// Delete records of `collection` matching `filter`; returns the number deleted
    fn delete_many(&self, collection: &str, filter: &RecordFilter) -> Result<usize>;

    /// Replace the full contents of `collection` with `records`
    ///
    /// The provided version deletes then inserts and is not atomic: if
    /// `insert_many` fails after the delete, the collection is left empty
    /// and the insert error is returned. Stores that can swap a collection
    /// in one step should override it.
    fn replace_collection(&self, collection: &str, records: Vec<Record>) -> Result<usize> {
        self.delete_many(collection, &RecordFilter::All)?;
        if records.is_empty() {
            return Ok(0);
        }
        self.insert_many(collection, records)
    }
}

/// Mutex-guarded in-memory record store
///
/// `replace_collection` swaps a collection under a single lock, so readers
/// never see it half replaced.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    collections: Mutex<BTreeMap<String, Vec<Record>>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection (builder style)
    pub fn with_collection<S: Into<String>>(self, name: S, records: Vec<Record>) -> Self {
        if let Ok(mut collections) = self.collections.lock() {
            collections.insert(name.into(), records);
        }
        self
    }

    fn guard(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<Record>>>> {
        self.collections
            .lock()
            .map_err(|_| ArchivistError::record_store("record store lock poisoned"))
    }

    /// Number of records currently in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.guard()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Snapshot of a collection's records
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.guard()
            .map(|c| c.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn find(&self, collection: &str, filter: &RecordFilter) -> Result<Vec<Record>> {
        Ok(self
            .guard()?
            .get(collection)
            .map(|records| records.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default())
    }

    fn insert_many(&self, collection: &str, records: Vec<Record>) -> Result<usize> {
        let inserted = records.len();
        self.guard()?
            .entry(collection.to_string())
            .or_default()
            .extend(records);
        Ok(inserted)
    }

    fn delete_many(&self, collection: &str, filter: &RecordFilter) -> Result<usize> {
        let mut collections = self.guard()?;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok(before - records.len())
    }

    fn replace_collection(&self, collection: &str, records: Vec<Record>) -> Result<usize> {
        let inserted = records.len();
        self.guard()?.insert(collection.to_string(), records);
        Ok(inserted)
    }
}

//! Durable storage for autopilot records.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use super::types::AutopilotRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
}

/// Keyed by PR number. `put` replaces any existing record.
pub trait RecordStore: Send + Sync {
    fn put(&self, record: &AutopilotRecord) -> Result<(), StoreError>;

    fn get(&self, pr_number: u64) -> Result<Option<AutopilotRecord>, StoreError>;

    /// All records ordered by PR number.
    fn list(&self) -> Result<Vec<AutopilotRecord>, StoreError>;

    /// Returns whether a record was removed.
    fn delete(&self, pr_number: u64) -> Result<bool, StoreError>;
}

/// Non-durable store, for tests and for running without a database.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<u64, AutopilotRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn put(&self, record: &AutopilotRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.pr_number, record.clone());
        Ok(())
    }

    fn get(&self, pr_number: u64) -> Result<Option<AutopilotRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&pr_number)
            .cloned())
    }

    fn list(&self) -> Result<Vec<AutopilotRecord>, StoreError> {
        let mut records: Vec<AutopilotRecord> = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        records.sort_by_key(|r| r.pr_number);
        Ok(records)
    }

    fn delete(&self, pr_number: u64) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pr_number)
            .is_some())
    }
}

//! Record store with switchable write failures.

use std::sync::{Mutex, PoisonError};

use crate::autopilot::{AutopilotRecord, InMemoryRecordStore, RecordStore, StoreError};

/// In-memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyRecordStore {
    inner: InMemoryRecordStore,
    /// Writes still allowed before every write fails; `None` never fails.
    writes_left: Mutex<Option<usize>>,
}

impl FlakyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.writes_left() = fail.then_some(0);
    }

    /// Let `n` more writes through, then fail every write.
    pub fn fail_writes_after(&self, n: usize) {
        *self.writes_left() = Some(n);
    }

    fn writes_left(&self) -> std::sync::MutexGuard<'_, Option<usize>> {
        self.writes_left
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), StoreError> {
        match self.writes_left().as_mut() {
            None => Ok(()),
            Some(0) => Err(StoreError::Database("disk I/O error".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }
}

impl RecordStore for FlakyRecordStore {
    fn put(&self, record: &AutopilotRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(record)
    }

    fn get(&self, pr_number: u64) -> Result<Option<AutopilotRecord>, StoreError> {
        self.inner.get(pr_number)
    }

    fn list(&self) -> Result<Vec<AutopilotRecord>, StoreError> {
        self.inner.list()
    }

    fn delete(&self, pr_number: u64) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(pr_number)
    }
}

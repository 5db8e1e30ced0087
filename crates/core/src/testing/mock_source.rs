//! Mock work-item source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::source::{ItemLabeler, SourceError, WorkItem, WorkSource};

/// Work source returning configurable items or a configurable error.
///
/// Label writes change the stored items, so the next listing reflects them.
#[derive(Default)]
pub struct MockWorkSource {
    items: Mutex<Vec<WorkItem>>,
    error: Mutex<Option<SourceError>>,
    label_error: Mutex<Option<SourceError>>,
    label_ops: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockWorkSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_items(&self, items: Vec<WorkItem>) {
        *lock(&self.items) = items;
    }

    /// Every listing fails with this error until cleared.
    pub fn set_error(&self, error: SourceError) {
        *lock(&self.error) = Some(error);
    }

    pub fn clear_error(&self) {
        *lock(&self.error) = None;
    }

    /// Make every label write fail (or succeed with `None`).
    pub fn set_label_error(&self, error: Option<SourceError>) {
        *lock(&self.label_error) = error;
    }

    /// Number of listing calls so far.
    pub fn list_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful label writes as `"+<label>:<id>"` / `"-<label>:<id>"`.
    pub fn label_ops(&self) -> Vec<String> {
        lock(&self.label_ops).clone()
    }

    /// Current labels of a stored item; empty if unknown.
    pub fn item_labels(&self, id: &str) -> Vec<String> {
        lock(&self.items)
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.labels.clone())
            .unwrap_or_default()
    }

    fn check_label_error(&self) -> Result<(), SourceError> {
        match lock(&self.label_error).as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WorkSource for MockWorkSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_open_items(&self) -> Result<Vec<WorkItem>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.error).as_ref() {
            return Err(error.clone());
        }
        Ok(lock(&self.items).clone())
    }
}

#[async_trait]
impl ItemLabeler for MockWorkSource {
    async fn add_label(&self, item_id: &str, label: &str) -> Result<(), SourceError> {
        self.check_label_error()?;
        if let Some(item) = lock(&self.items).iter_mut().find(|i| i.id == item_id) {
            if !item.has_label(label) {
                item.labels.push(label.to_string());
            }
        }
        lock(&self.label_ops).push(format!("+{}:{}", label, item_id));
        Ok(())
    }

    async fn remove_label(&self, item_id: &str, label: &str) -> Result<(), SourceError> {
        self.check_label_error()?;
        if let Some(item) = lock(&self.items).iter_mut().find(|i| i.id == item_id) {
            item.labels.retain(|l| !l.eq_ignore_ascii_case(label));
        }
        lock(&self.label_ops).push(format!("-{}:{}", label, item_id));
        Ok(())
    }
}

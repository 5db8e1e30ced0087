//! Recording notifier and listeners.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::executor::Task;
use crate::notify::{NotifyError, Notifier};
use crate::orchestrator::{PrCreated, PrCreatedListener, TaskFinishedListener, TaskOutcome};

/// Records lifecycle events as `"<kind>:<task_id>"` strings.
///
/// Progress is kept separately, see [`progress_percents`](Self::progress_percents).
#[derive(Default)]
pub struct MockNotifier {
    events: Mutex<Vec<String>>,
    progress: Mutex<Vec<(String, u8)>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notified percentages for one task, in order.
    pub fn progress_percents(&self, task_id: &str) -> Vec<u8> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, p)| *p)
            .collect()
    }

    fn push(&self, kind: &str, task_id: &str) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("{}:{}", kind, task_id));
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn task_started(&self, task_id: &str, _title: &str) -> Result<(), NotifyError> {
        self.push("started", task_id);
        Ok(())
    }

    async fn task_progress(
        &self,
        task_id: &str,
        _step: &str,
        percent: u8,
    ) -> Result<(), NotifyError> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((task_id.to_string(), percent));
        Ok(())
    }

    async fn task_completed(
        &self,
        task_id: &str,
        _title: &str,
        _pr_url: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.push("completed", task_id);
        Ok(())
    }

    async fn task_failed(
        &self,
        task_id: &str,
        _title: &str,
        _error: &str,
    ) -> Result<(), NotifyError> {
        self.push("failed", task_id);
        Ok(())
    }
}

/// Collects every [`PrCreated`] event it receives.
#[derive(Default)]
pub struct MockPrListener {
    events: Mutex<Vec<PrCreated>>,
}

impl MockPrListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PrCreated> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PrCreatedListener for MockPrListener {
    async fn on_pr_created(&self, event: PrCreated) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Records `(task_id, outcome)` for every finished task.
#[derive(Default)]
pub struct MockFinishListener {
    outcomes: Mutex<Vec<(String, TaskOutcome)>>,
}

impl MockFinishListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<(String, TaskOutcome)> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskFinishedListener for MockFinishListener {
    async fn on_task_finished(&self, task: &Task, outcome: TaskOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((task.id.clone(), outcome));
    }
}

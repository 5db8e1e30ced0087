//! Task notifications (chat integrations and the like).
//!
//! Delivery is best-effort: the orchestrator logs a failed notification and
//! carries on.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Receives task lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn task_started(&self, task_id: &str, title: &str) -> Result<(), NotifyError>;

    async fn task_progress(
        &self,
        task_id: &str,
        step: &str,
        percent: u8,
    ) -> Result<(), NotifyError>;

    async fn task_completed(
        &self,
        task_id: &str,
        title: &str,
        pr_url: Option<&str>,
    ) -> Result<(), NotifyError>;

    async fn task_failed(&self, task_id: &str, title: &str, error: &str)
        -> Result<(), NotifyError>;
}

/// Notifier that writes events to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn task_started(&self, task_id: &str, title: &str) -> Result<(), NotifyError> {
        info!(task_id, title, "Task started");
        Ok(())
    }

    async fn task_progress(
        &self,
        task_id: &str,
        step: &str,
        percent: u8,
    ) -> Result<(), NotifyError> {
        info!(task_id, step, percent, "Task progress");
        Ok(())
    }

    async fn task_completed(
        &self,
        task_id: &str,
        title: &str,
        pr_url: Option<&str>,
    ) -> Result<(), NotifyError> {
        info!(task_id, title, pr_url = pr_url.unwrap_or("-"), "Task completed");
        Ok(())
    }

    async fn task_failed(
        &self,
        task_id: &str,
        title: &str,
        error: &str,
    ) -> Result<(), NotifyError> {
        info!(task_id, title, error, "Task failed");
        Ok(())
    }
}

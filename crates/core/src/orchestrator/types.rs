//! Types for the task orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::Task;

/// Errors that can occur while queueing tasks.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The queue was full; the task was dropped.
    #[error("task queue full, dropped task {0}")]
    QueueFull(String),

    /// The orchestrator has been stopped.
    #[error("orchestrator is stopped")]
    Stopped,
}

/// `(task_id, step, percent, message)` observer.
pub type ProgressCallback = Arc<dyn Fn(&str, &str, u8, &str) + Send + Sync>;

/// Published when a task finishes with a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCreated {
    pub pr_number: u64,
    pub pr_url: String,
    /// Work item the task came from.
    pub source_id: String,
    pub task_id: String,
    pub commit_sha: Option<String>,
    pub branch: String,
}

/// Receives [`PrCreated`] events. Delivery is at-least-once.
#[async_trait]
pub trait PrCreatedListener: Send + Sync {
    async fn on_pr_created(&self, event: PrCreated);
}

/// How a task left the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// Still queued when the orchestrator stopped; never executed.
    Abandoned,
}

/// Told about every task that finishes or is abandoned.
#[async_trait]
pub trait TaskFinishedListener: Send + Sync {
    async fn on_task_finished(&self, task: &Task, outcome: TaskOutcome);
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Whether workers are running.
    pub running: bool,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Tasks waiting in the queue.
    pub queued: usize,
    /// Tasks currently executing.
    pub running_tasks: usize,
    pub total_queued: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    /// Dequeued tasks skipped because the same id was already executing.
    pub duplicates_skipped: u64,
}

//! Types for the executor boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A planned unit of work.
///
/// The id is fixed at creation and is the key for per-task mutual
/// exclusion in the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Id of the work item this task was planned from.
    pub source_id: String,
    pub title: String,
    /// Payload handed to the executor (the task document).
    pub description: String,
    pub project_path: PathBuf,
    pub branch: String,
    /// Higher runs sooner.
    pub priority: f64,
}

/// Outcome of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub pr_url: Option<String>,
    pub commit_sha: Option<String>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_pr_url(mut self, url: impl Into<String>) -> Self {
        self.pr_url = Some(url.into());
        self
    }

    pub fn with_commit_sha(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Errors raised by an executor before a result could be produced.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn executor: {0}")]
    Spawn(String),

    #[error("executor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution cancelled")]
    Cancelled,
}

/// Receives progress while a task runs.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, task_id: &str, step: &str, percent: u8, message: &str);
}

/// Progress sink that discards everything.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _task_id: &str, _step: &str, _percent: u8, _message: &str) {}
}

/// Performs one task and reports the outcome.
///
/// `Err` is reserved for failures to run at all; a task that ran and did
/// not succeed returns `Ok` with `success == false`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_builders() {
        let ok = ExecutionResult::success()
            .with_pr_url("https://github.com/a/b/pull/1")
            .with_commit_sha("abc123");
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.pr_url.as_deref(), Some("https://github.com/a/b/pull/1"));

        let failed = ExecutionResult::failure("build failed");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("build failed"));
    }

    #[test]
    fn test_result_serializes_duration_as_millis() {
        let result = ExecutionResult::success().with_duration(Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration"], 1500);

        let parsed: ExecutionResult = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ExecutorError::Cancelled.to_string(), "execution cancelled");
    }
}

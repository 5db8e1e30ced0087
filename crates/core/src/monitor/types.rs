//! Types for the task monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of a task.
///
/// Transitions only move forward: `Registered -> Running -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Registered,
    Running,
    Completed,
    Failed,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Registered => "registered",
            TaskPhase::Running => "running",
            TaskPhase::Completed => "completed",
            TaskPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: TaskPhase) -> bool {
        matches!(
            (self, next),
            (TaskPhase::Registered, TaskPhase::Running)
                | (TaskPhase::Registered, TaskPhase::Failed)
                | (TaskPhase::Running, TaskPhase::Completed)
                | (TaskPhase::Running, TaskPhase::Failed)
        )
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one task as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub title: String,
    pub phase: TaskPhase,
    /// Last reported progress, 0-100.
    pub progress: u8,
    /// Executor-defined step label (e.g. "planning", "testing").
    pub step: String,
    pub message: String,
    pub pr_url: Option<String>,
    pub error: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    pub(crate) fn new(task_id: &str, title: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            title: title.to_string(),
            phase: TaskPhase::Registered,
            progress: 0,
            step: String::new(),
            message: String::new(),
            pr_url: None,
            error: None,
            registered_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions_are_monotonic() {
        assert!(TaskPhase::Registered.can_transition_to(TaskPhase::Running));
        assert!(TaskPhase::Running.can_transition_to(TaskPhase::Completed));
        assert!(TaskPhase::Running.can_transition_to(TaskPhase::Failed));
        assert!(TaskPhase::Registered.can_transition_to(TaskPhase::Failed));

        assert!(!TaskPhase::Running.can_transition_to(TaskPhase::Registered));
        assert!(!TaskPhase::Completed.can_transition_to(TaskPhase::Running));
        assert!(!TaskPhase::Failed.can_transition_to(TaskPhase::Completed));
        assert!(!TaskPhase::Registered.can_transition_to(TaskPhase::Completed));
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&TaskPhase::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!(TaskPhase::Failed.to_string(), "failed");
    }
}

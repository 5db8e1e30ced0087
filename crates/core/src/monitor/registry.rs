//! Thread-safe task registry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::{debug, warn};

use super::types::{TaskPhase, TaskState};

/// Registry mapping task id to its latest [`TaskState`].
///
/// Every read returns an owned copy, so callers never observe a record
/// while it is being mutated.
#[derive(Default)]
pub struct Monitor {
    tasks: RwLock<HashMap<String, TaskState>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task in `Registered`.
    ///
    /// Returns `false` if the id is already registered or running.
    ///
    /// A finished id is different: the old record is discarded and a new
    /// attempt starts in `Registered`. The phase order applies per attempt,
    /// so a retried item (after a poller reset) is visible again instead of
    /// being stuck in its old terminal phase. The previous attempt's error
    /// and PR URL are not kept.
    pub fn register(&self, task_id: &str, title: &str) -> bool {
        let mut tasks = self.write();
        if let Some(existing) = tasks.get(task_id) {
            if !existing.phase.is_terminal() {
                debug!(task_id, phase = %existing.phase, "Task already tracked, not re-registering");
                return false;
            }
        }
        tasks.insert(task_id.to_string(), TaskState::new(task_id, title));
        true
    }

    /// Move a task to `Running`.
    pub fn start(&self, task_id: &str) -> bool {
        self.transition(task_id, TaskPhase::Running, |state| {
            state.started_at = Some(Utc::now());
        })
    }

    /// Record progress for a running task. Ignored for any other phase.
    pub fn update_progress(&self, task_id: &str, step: &str, percent: u8, message: &str) -> bool {
        let mut tasks = self.write();
        match tasks.get_mut(task_id) {
            Some(state) if state.phase == TaskPhase::Running => {
                state.progress = percent.min(100);
                state.step = step.to_string();
                state.message = message.to_string();
                true
            }
            Some(_) => false,
            None => {
                debug!(task_id, "Progress for unknown task ignored");
                false
            }
        }
    }

    /// Mark a running task completed.
    pub fn complete(&self, task_id: &str, pr_url: Option<String>) -> bool {
        self.transition(task_id, TaskPhase::Completed, |state| {
            state.progress = 100;
            state.pr_url = pr_url;
            state.finished_at = Some(Utc::now());
        })
    }

    /// Mark a task failed with the given message.
    pub fn fail(&self, task_id: &str, error: &str) -> bool {
        self.transition(task_id, TaskPhase::Failed, |state| {
            state.error = Some(error.to_string());
            state.message = error.to_string();
            state.finished_at = Some(Utc::now());
        })
    }

    pub fn get(&self, task_id: &str) -> Option<TaskState> {
        self.read().get(task_id).cloned()
    }

    /// All tasks, oldest registration first.
    pub fn get_all(&self) -> Vec<TaskState> {
        let mut all: Vec<TaskState> = self.read().values().cloned().collect();
        all.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        all
    }

    pub fn get_running(&self) -> Vec<TaskState> {
        self.get_all()
            .into_iter()
            .filter(|t| t.phase == TaskPhase::Running)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn transition<F>(&self, task_id: &str, next: TaskPhase, apply: F) -> bool
    where
        F: FnOnce(&mut TaskState),
    {
        let mut tasks = self.write();
        let Some(state) = tasks.get_mut(task_id) else {
            warn!(task_id, to = %next, "Transition for unknown task ignored");
            return false;
        };
        if !state.phase.can_transition_to(next) {
            warn!(task_id, from = %state.phase, to = %next, "Rejected non-monotonic transition");
            return false;
        }
        state.phase = next;
        apply(state);
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TaskState>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TaskState>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }
}

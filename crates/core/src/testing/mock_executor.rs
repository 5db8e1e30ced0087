//! Mock task executor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutionResult, ExecutorError, ProgressSink, Task, TaskExecutor};

/// Executor with scripted outcomes and concurrency accounting.
///
/// By default every task succeeds immediately. Per-task results, panics,
/// a fixed delay and a progress script can be configured.
#[derive(Default)]
pub struct MockExecutor {
    results: Mutex<HashMap<String, ExecutionResult>>,
    panics: Mutex<HashSet<String>>,
    delay: Duration,
    progress: Vec<u8>,
    executions: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    active_per_id: Mutex<HashMap<String, usize>>,
    peak_per_id: Mutex<HashMap<String, usize>>,
}

/// Decrements the active counters, even if the execution panics.
struct Active<'a> {
    executor: &'a MockExecutor,
    task_id: String,
}

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.executor.active.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self
            .executor
            .active_per_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&self.task_id)
        {
            *count -= 1;
        }
    }
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each execution sleeps this long (cancellable) before finishing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Percentages reported (step "work") before finishing.
    pub fn with_progress(mut self, percents: Vec<u8>) -> Self {
        self.progress = percents;
        self
    }

    pub fn set_result(&self, task_id: &str, result: ExecutionResult) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string(), result);
    }

    pub fn set_panic(&self, task_id: &str) {
        self.panics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.to_string());
    }

    pub fn total_executions(&self) -> usize {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn executions_of(&self, task_id: &str) -> usize {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|id| *id == task_id)
            .count()
    }

    /// Most executions observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Most executions of one task id observed running at once.
    pub fn peak_concurrency_for(&self, task_id: &str) -> usize {
        self.peak_per_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, task_id: &str) -> Active<'_> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task_id.to_string());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut active = self
            .active_per_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = active.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        let mut peaks = self
            .peak_per_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let peak = peaks.entry(task_id.to_string()).or_insert(0);
        *peak = (*peak).max(*count);

        Active {
            executor: self,
            task_id: task_id.to_string(),
        }
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    async fn execute(
        &self,
        task: &Task,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutorError> {
        let _active = self.enter(&task.id);

        let should_panic = self
            .panics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&task.id);
        if should_panic {
            panic!("mock executor exploded on {}", task.id);
        }

        for percent in &self.progress {
            progress.report(&task.id, "work", *percent, "").await;
        }

        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        let result = self
            .results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task.id)
            .cloned()
            .unwrap_or_else(ExecutionResult::success);
        Ok(result.with_duration(self.delay))
    }
}

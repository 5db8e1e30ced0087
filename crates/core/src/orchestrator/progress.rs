//! Routes executor progress to the monitor, callbacks and notifiers.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::executor::ProgressSink;
use crate::monitor::Monitor;
use crate::notify::Notifier;

use super::types::ProgressCallback;

/// Progress sink handed to the executor for one task.
pub(crate) struct ProgressRouter {
    monitor: Arc<Monitor>,
    callbacks: Arc<RwLock<Vec<ProgressCallback>>>,
    notifiers: Arc<Vec<Arc<dyn Notifier>>>,
    step: u8,
    last_notified: AtomicU8,
}

impl ProgressRouter {
    pub(crate) fn new(
        monitor: Arc<Monitor>,
        callbacks: Arc<RwLock<Vec<ProgressCallback>>>,
        notifiers: Arc<Vec<Arc<dyn Notifier>>>,
        step: u8,
    ) -> Self {
        Self {
            monitor,
            callbacks,
            notifiers,
            step: step.max(1),
            last_notified: AtomicU8::new(0),
        }
    }

    /// Notify at each multiple of `step`, once, in increasing order.
    fn should_notify(&self, percent: u8) -> bool {
        if percent == 0 || percent % self.step != 0 {
            return false;
        }
        self.last_notified.fetch_max(percent, Ordering::SeqCst) < percent
    }
}

#[async_trait]
impl ProgressSink for ProgressRouter {
    async fn report(&self, task_id: &str, step: &str, percent: u8, message: &str) {
        let percent = percent.min(100);
        self.monitor.update_progress(task_id, step, percent, message);

        let callbacks: Vec<ProgressCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(task_id, step, percent, message);
        }

        if self.should_notify(percent) {
            for notifier in self.notifiers.iter() {
                if let Err(e) = notifier.task_progress(task_id, step, percent).await {
                    warn!(task_id, error = %e, "Progress notification failed");
                }
            }
        }
    }
}

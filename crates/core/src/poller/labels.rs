//! Status labels written back to the tracker.
//!
//! The poller only reads labels; this is the writing side. An item gets the
//! in-progress label when it is picked up and the done or failed label when
//! its task finishes, so a restarted process does not pick it up again.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::source::ItemLabeler;

use super::types::StatusLabels;

/// Best-effort label updates. Tracker errors are logged, never returned.
pub struct StatusLabeler {
    labeler: Arc<dyn ItemLabeler>,
    labels: StatusLabels,
}

impl StatusLabeler {
    pub fn new(labeler: Arc<dyn ItemLabeler>, labels: StatusLabels) -> Self {
        Self { labeler, labels }
    }

    pub fn labels(&self) -> &StatusLabels {
        &self.labels
    }

    pub async fn mark_in_progress(&self, item_id: &str) {
        self.add(item_id, &self.labels.in_progress).await;
    }

    /// Undo a pickup that never reached a worker.
    pub async fn clear_in_progress(&self, item_id: &str) {
        self.remove(item_id, &self.labels.in_progress).await;
    }

    pub async fn mark_done(&self, item_id: &str) {
        self.add(item_id, &self.labels.done).await;
        self.remove(item_id, &self.labels.in_progress).await;
    }

    pub async fn mark_failed(&self, item_id: &str) {
        self.add(item_id, &self.labels.failed).await;
        self.remove(item_id, &self.labels.in_progress).await;
    }

    async fn add(&self, item_id: &str, label: &str) {
        match self.labeler.add_label(item_id, label).await {
            Ok(()) => debug!(item_id, label, "Added status label"),
            Err(e) => warn!(item_id, label, error = %e, "Failed to add status label"),
        }
    }

    async fn remove(&self, item_id: &str, label: &str) {
        match self.labeler.remove_label(item_id, label).await {
            Ok(()) => debug!(item_id, label, "Removed status label"),
            Err(e) => warn!(item_id, label, error = %e, "Failed to remove status label"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceError;
    use crate::testing::{fixtures, MockWorkSource};

    fn labels() -> StatusLabels {
        StatusLabels {
            in_progress: "wip".to_string(),
            done: "done".to_string(),
            failed: "failed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_done_replaces_in_progress() {
        let source = Arc::new(MockWorkSource::new());
        source.set_items(vec![fixtures::work_item("4")]);
        let labeler = StatusLabeler::new(source.clone(), labels());

        labeler.mark_in_progress("4").await;
        labeler.mark_done("4").await;

        assert_eq!(source.label_ops(), vec!["+wip:4", "+done:4", "-wip:4"]);
        assert_eq!(source.item_labels("4"), vec!["shipyard", "done"]);
    }

    #[tokio::test]
    async fn test_failed_and_cleared() {
        let source = Arc::new(MockWorkSource::new());
        source.set_items(vec![fixtures::work_item("1"), fixtures::work_item("2")]);
        let labeler = StatusLabeler::new(source.clone(), labels());

        labeler.mark_in_progress("1").await;
        labeler.mark_failed("1").await;
        labeler.mark_in_progress("2").await;
        labeler.clear_in_progress("2").await;

        assert_eq!(source.item_labels("1"), vec!["shipyard", "failed"]);
        assert_eq!(source.item_labels("2"), vec!["shipyard"]);
    }

    #[tokio::test]
    async fn test_tracker_errors_are_swallowed() {
        let source = Arc::new(MockWorkSource::new());
        source.set_label_error(Some(SourceError::Request("timeout".to_string())));
        let labeler = StatusLabeler::new(source.clone(), labels());

        labeler.mark_done("9").await;
        assert!(source.label_ops().is_empty());
    }
}

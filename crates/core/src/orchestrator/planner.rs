//! Turning work items into tasks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::Task;
use crate::poller::{ItemHandler, StatusLabeler};
use crate::source::WorkItem;

use super::config::OrchestratorConfig;
use super::runner::Orchestrator;
use super::types::{TaskFinishedListener, TaskOutcome};

static PR_NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/pulls?/(\d+)").unwrap());

/// Pull-request number from a URL like `https://host/owner/repo/pull/42`.
pub fn extract_pr_number(url: &str) -> Option<u64> {
    PR_NUMBER_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Produces a task (and its document) from a work item.
#[async_trait]
pub trait TaskPlanner: Send + Sync {
    async fn plan(&self, item: &WorkItem) -> anyhow::Result<Task>;
}

/// Planner that uses the item text as the task document.
pub struct DefaultPlanner {
    project_path: PathBuf,
    branch_prefix: String,
}

impl DefaultPlanner {
    pub fn new(project_path: impl Into<PathBuf>, branch_prefix: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.project_path.clone(), config.branch_prefix.clone())
    }

    /// Stable document id: the same item id and title always give the same id.
    pub fn document_id(item: &WorkItem) -> String {
        let mut hasher = Sha256::new();
        hasher.update(item.id.as_bytes());
        hasher.update(b"\n");
        hasher.update(item.title.as_bytes());
        let digest = hasher.finalize();
        digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
    }

    fn document(item: &WorkItem) -> String {
        let mut doc = format!("# {}\n\nSource: {}\n", item.title, item.id);
        if !item.body.trim().is_empty() {
            doc.push('\n');
            doc.push_str(item.body.trim());
            doc.push('\n');
        }
        doc
    }
}

#[async_trait]
impl TaskPlanner for DefaultPlanner {
    async fn plan(&self, item: &WorkItem) -> anyhow::Result<Task> {
        let age_hours = (Utc::now() - item.created_at).num_minutes().max(0) as f64 / 60.0;
        let task = Task {
            id: format!("task-{}-{}", item.id, Self::document_id(item)),
            source_id: item.id.clone(),
            title: item.title.clone(),
            description: Self::document(item),
            project_path: self.project_path.clone(),
            branch: format!("{}/{}", self.branch_prefix, item.id),
            priority: age_hours,
        };
        debug!(task_id = %task.id, source_id = %item.id, "Planned task");
        Ok(task)
    }
}

/// Poller handler that plans each item and queues the task.
pub struct DispatchHandler {
    planner: Arc<dyn TaskPlanner>,
    orchestrator: Arc<Orchestrator>,
    labeler: Option<Arc<StatusLabeler>>,
}

impl DispatchHandler {
    pub fn new(planner: Arc<dyn TaskPlanner>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            planner,
            orchestrator,
            labeler: None,
        }
    }

    /// Label items in progress on pickup. Register the same labeler as the
    /// orchestrator's finish listener to label the outcome.
    pub fn with_labeler(mut self, labeler: Arc<StatusLabeler>) -> Self {
        self.labeler = Some(labeler);
        self
    }
}

#[async_trait]
impl ItemHandler for DispatchHandler {
    async fn handle(&self, item: WorkItem, cancel: CancellationToken) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("cancelled before planning item {}", item.id);
        }
        let task = self
            .planner
            .plan(&item)
            .await
            .with_context(|| format!("planning item {}", item.id))?;

        if let Some(labeler) = &self.labeler {
            labeler.mark_in_progress(&item.id).await;
        }
        if let Err(e) = self.orchestrator.queue_task(task) {
            if let Some(labeler) = &self.labeler {
                labeler.clear_in_progress(&item.id).await;
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl TaskFinishedListener for StatusLabeler {
    async fn on_task_finished(&self, task: &Task, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => self.mark_done(&task.source_id).await,
            TaskOutcome::Failed => self.mark_failed(&task.source_id).await,
            // Picked up again on the next run.
            TaskOutcome::Abandoned => self.clear_in_progress(&task.source_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionResult;
    use crate::monitor::{Monitor, TaskPhase};
    use crate::poller::StatusLabels;
    use crate::testing::{fixtures, wait_until, MockExecutor, MockWorkSource};
    use std::time::Duration;

    fn labeler(source: &Arc<MockWorkSource>) -> Arc<StatusLabeler> {
        Arc::new(StatusLabeler::new(
            source.clone(),
            StatusLabels {
                in_progress: "wip".to_string(),
                done: "done".to_string(),
                failed: "failed".to_string(),
            },
        ))
    }

    #[test]
    fn test_extract_pr_number() {
        assert_eq!(
            extract_pr_number("https://github.com/acme/app/pull/42"),
            Some(42)
        );
        assert_eq!(
            extract_pr_number("https://git.example.com/acme/app/pulls/7"),
            Some(7)
        );
        assert_eq!(extract_pr_number("https://github.com/acme/app/issues/3"), None);
        assert_eq!(extract_pr_number(""), None);
    }

    #[tokio::test]
    async fn test_default_planner() {
        let planner = DefaultPlanner::new("/repo", "bot");
        let mut item = fixtures::work_item("17");
        item.title = "Add dark mode".to_string();
        item.body = "Please.".to_string();

        let task = planner.plan(&item).await.unwrap();
        assert!(task.id.starts_with("task-17-"));
        assert_eq!(task.id.len(), "task-17-".len() + 12);
        assert_eq!(task.source_id, "17");
        assert_eq!(task.branch, "bot/17");
        assert_eq!(task.project_path, PathBuf::from("/repo"));
        assert!(task.description.contains("# Add dark mode"));
        assert!(task.description.contains("Please."));

        let again = planner.plan(&item).await.unwrap();
        assert_eq!(again.id, task.id);
    }

    #[test]
    fn test_document_id_depends_on_title() {
        let a = fixtures::work_item("1");
        let mut b = fixtures::work_item("1");
        b.title = "Something else".to_string();
        assert_ne!(DefaultPlanner::document_id(&a), DefaultPlanner::document_id(&b));
    }

    #[tokio::test]
    async fn test_dispatch_handler_queues_task() {
        let monitor = Arc::new(Monitor::new());
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MockExecutor::new()),
            Arc::clone(&monitor),
        ));
        let handler = DispatchHandler::new(
            Arc::new(DefaultPlanner::new(".", "shipyard")),
            Arc::clone(&orchestrator),
        );

        handler
            .handle(fixtures::work_item("5"), CancellationToken::new())
            .await
            .unwrap();

        let states = monitor.get_all();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].phase, TaskPhase::Registered);
        assert_eq!(orchestrator.status().queued, 1);
    }

    #[tokio::test]
    async fn test_dispatch_handler_reports_stopped_orchestrator() {
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MockExecutor::new()),
            Arc::new(Monitor::new()),
        ));
        orchestrator.stop().await;
        let handler = DispatchHandler::new(
            Arc::new(DefaultPlanner::new(".", "shipyard")),
            Arc::clone(&orchestrator),
        );

        let result = handler
            .handle(fixtures::work_item("5"), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_labels_follow_task_outcome() {
        let source = Arc::new(MockWorkSource::new());
        source.set_items(vec![fixtures::work_item("1"), fixtures::work_item("2")]);
        let labeler = labeler(&source);
        let executor = Arc::new(MockExecutor::new());
        let planner = Arc::new(DefaultPlanner::new(".", "shipyard"));
        let failing_id = planner.plan(&fixtures::work_item("2")).await.unwrap().id;
        executor.set_result(&failing_id, ExecutionResult::failure("tests failed"));

        let orchestrator = Arc::new(
            Orchestrator::new(OrchestratorConfig::default(), executor, Arc::new(Monitor::new()))
                .with_finish_listener(labeler.clone()),
        );
        orchestrator.start();
        let handler = DispatchHandler::new(planner, Arc::clone(&orchestrator)).with_labeler(labeler);

        for id in ["1", "2"] {
            handler
                .handle(fixtures::work_item(id), CancellationToken::new())
                .await
                .unwrap();
        }
        let finished = wait_until(Duration::from_secs(2), || {
            source.item_labels("1").contains(&"done".to_string())
                && source.item_labels("2").contains(&"failed".to_string())
        })
        .await;
        orchestrator.stop().await;

        assert!(finished, "labels: {:?}", source.label_ops());
        assert_eq!(source.item_labels("1"), vec!["shipyard", "done"]);
        assert_eq!(source.item_labels("2"), vec!["shipyard", "failed"]);
        assert!(source.label_ops().contains(&"+wip:1".to_string()));
    }

    #[tokio::test]
    async fn test_rejected_task_clears_in_progress_label() {
        let source = Arc::new(MockWorkSource::new());
        source.set_items(vec![fixtures::work_item("3")]);
        let orchestrator = Arc::new(Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MockExecutor::new()),
            Arc::new(Monitor::new()),
        ));
        orchestrator.stop().await;
        let handler = DispatchHandler::new(
            Arc::new(DefaultPlanner::new(".", "shipyard")),
            Arc::clone(&orchestrator),
        )
        .with_labeler(labeler(&source));

        assert!(handler
            .handle(fixtures::work_item("3"), CancellationToken::new())
            .await
            .is_err());
        assert_eq!(source.label_ops(), vec!["+wip:3", "-wip:3"]);
        assert_eq!(source.item_labels("3"), vec!["shipyard"]);
    }
}

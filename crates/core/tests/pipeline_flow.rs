//! End-to-end flow: work item -> task -> pull request -> merge.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use shipyard_core::autopilot::AutopilotConfig;
use shipyard_core::orchestrator::OrchestratorConfig;
use shipyard_core::testing::{
    fixtures, wait_until, MockExecutor, MockNotifier, MockPullRequestHost, MockWorkSource,
};
use shipyard_core::{
    AutopilotController, CiStatus, DefaultPlanner, DispatchHandler, ExecutionResult,
    InMemoryRecordStore, Monitor, Orchestrator, Poller, TaskPhase,
};

#[tokio::test]
async fn test_issue_to_merged_pull_request() {
    let item = fixtures::work_item("42");
    let task_id = format!("task-42-{}", DefaultPlanner::document_id(&item));

    let executor = Arc::new(MockExecutor::new());
    executor.set_result(
        &task_id,
        ExecutionResult::success()
            .with_pr_url("https://github.com/acme/app/pull/7")
            .with_commit_sha("sha-7"),
    );

    let host = Arc::new(MockPullRequestHost::new());
    host.add_open_pr(7);
    host.set_ci_status("sha-7", CiStatus::Success);
    let controller = Arc::new(AutopilotController::new(
        AutopilotConfig {
            enabled: true,
            auto_merge: true,
            ..Default::default()
        },
        host.clone(),
        Arc::new(InMemoryRecordStore::new()),
    ));

    let monitor = Arc::new(Monitor::new());
    let notifier = Arc::new(MockNotifier::new());
    let orchestrator = Arc::new(
        Orchestrator::new(OrchestratorConfig::default(), executor.clone(), monitor.clone())
            .with_notifier(notifier.clone())
            .with_pr_listener(controller.clone()),
    );
    orchestrator.start();

    let source = Arc::new(MockWorkSource::new());
    source.set_items(vec![item]);
    let handler = Arc::new(DispatchHandler::new(
        Arc::new(DefaultPlanner::new(".", "shipyard")),
        orchestrator.clone(),
    ));
    let poller = Poller::new(source, handler, Duration::from_secs(60));

    assert_eq!(poller.poll_once(&CancellationToken::new()).await, 1);
    poller.wait_for_active().await;

    let tracked = wait_until(Duration::from_secs(5), || controller.record(7).is_some()).await;
    assert!(tracked, "pull request was never handed to autopilot");

    let state = monitor.get(&task_id).unwrap();
    assert_eq!(state.phase, TaskPhase::Completed);
    assert_eq!(state.pr_url.as_deref(), Some("https://github.com/acme/app/pull/7"));
    assert_eq!(
        notifier.events(),
        vec![format!("started:{}", task_id), format!("completed:{}", task_id)]
    );

    let record = controller.record(7).unwrap();
    assert_eq!(record.source_id, "42");
    assert_eq!(record.branch, "shipyard/42");

    // created -> ci_pending -> ci_passed -> merging -> merged
    for _ in 0..4 {
        controller.advance_all().await;
    }
    assert_eq!(host.merges(), vec![7]);
    assert!(controller.record(7).is_none());

    orchestrator.stop().await;
    assert_eq!(controller.failure_count(), 0);
}

#[tokio::test]
async fn test_running_loops_shut_down_cleanly() {
    let source = Arc::new(MockWorkSource::new());
    source.set_items((1..=5).map(|i| fixtures::work_item(&i.to_string())).collect());

    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(20)));
    let monitor = Arc::new(Monitor::new());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::default(),
        executor.clone(),
        monitor.clone(),
    ));
    orchestrator.start();

    let poller = Arc::new(
        Poller::new(
            source,
            Arc::new(DispatchHandler::new(
                Arc::new(DefaultPlanner::new(".", "shipyard")),
                orchestrator.clone(),
            )),
            Duration::from_millis(20),
        )
        .with_max_concurrent(2),
    );

    let cancel = CancellationToken::new();
    let poll_task = {
        let poller = Arc::clone(&poller);
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.start(cancel).await })
    };

    let done = wait_until(Duration::from_secs(5), || {
        orchestrator.status().completed == 5
    })
    .await;
    assert!(done);

    cancel.cancel();
    poll_task.await.unwrap();
    poller.wait_for_active().await;
    orchestrator.stop().await;

    assert_eq!(executor.total_executions(), 5);
    assert!(!poller.status().running);
    assert!(!orchestrator.is_running());
}

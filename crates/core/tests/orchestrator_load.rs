//! Orchestrator behaviour under load and failure.

use std::sync::Arc;
use std::time::Duration;

use shipyard_core::orchestrator::OrchestratorConfig;
use shipyard_core::testing::{fixtures, wait_until, MockExecutor};
use shipyard_core::{ExecutionResult, Monitor, Orchestrator, OrchestratorError, TaskPhase};

fn orchestrator(executor: Arc<MockExecutor>, workers: usize, capacity: usize) -> Orchestrator {
    let config = OrchestratorConfig {
        max_workers: workers,
        queue_capacity: capacity,
        ..Default::default()
    };
    Orchestrator::new(config, executor, Arc::new(Monitor::new()))
}

#[tokio::test]
async fn test_overflow_drops_without_deadlock() {
    let executor = Arc::new(MockExecutor::new());
    let orch = orchestrator(Arc::clone(&executor), 4, 100);

    let mut dropped = 0;
    for i in 0..150 {
        match orch.queue_task(fixtures::task(&format!("t{}", i))) {
            Ok(()) => {}
            Err(OrchestratorError::QueueFull(_)) => dropped += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(dropped >= 50, "only {} dropped", dropped);
    assert_eq!(orch.status().dropped, dropped as u64);

    orch.start();
    let drained = wait_until(Duration::from_secs(10), || orch.status().completed == 100).await;
    assert!(drained, "queued tasks did not drain");
    orch.stop().await;

    assert_eq!(executor.total_executions(), 100);
    let failed = orch
        .get_task_states()
        .iter()
        .filter(|s| s.phase == TaskPhase::Failed)
        .count();
    assert_eq!(failed, dropped);
}

#[tokio::test]
async fn test_build_failure_is_recorded_and_isolated() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(20)));
    executor.set_result("broken", ExecutionResult::failure("build failed"));
    let orch = orchestrator(Arc::clone(&executor), 3, 20);
    orch.start();

    let ids = ["a", "broken", "b", "c", "d"];
    for id in ids {
        orch.queue_task(fixtures::task(id)).unwrap();
    }
    let finished = wait_until(Duration::from_secs(5), || {
        orch.get_task_states()
            .iter()
            .filter(|s| s.phase.is_terminal())
            .count()
            == ids.len()
    })
    .await;
    assert!(finished);
    orch.stop().await;

    let monitor = orch.monitor();
    let broken = monitor.get("broken").unwrap();
    assert_eq!(broken.phase, TaskPhase::Failed);
    assert_eq!(broken.error.as_deref(), Some("build failed"));
    for id in ["a", "b", "c", "d"] {
        assert_eq!(monitor.get(id).unwrap().phase, TaskPhase::Completed);
    }
    assert!(orch.get_running_tasks().is_empty());
}

#[tokio::test]
async fn test_no_dequeue_after_stop() {
    let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(100)));
    let orch = orchestrator(Arc::clone(&executor), 2, 50);
    orch.start();
    for i in 0..20 {
        orch.queue_task(fixtures::task(&format!("t{}", i))).unwrap();
    }
    assert!(wait_until(Duration::from_secs(2), || executor.total_executions() >= 2).await);

    orch.stop().await;
    let executed = executor.total_executions();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(executor.total_executions(), executed);
    assert!(executed <= 4);
    let status = orch.status();
    assert!(!status.running);
    assert_eq!(status.queued, 0);
}

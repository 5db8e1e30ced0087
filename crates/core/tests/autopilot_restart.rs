//! Autopilot durability across restarts.

use std::sync::Arc;

use tempfile::TempDir;

use shipyard_core::autopilot::AutopilotConfig;
use shipyard_core::testing::{fixtures, MockPullRequestHost};
use shipyard_core::{
    AutopilotController, CiStatus, PrCreatedListener, PrStage, RecordStore, SqliteRecordStore,
};

fn config() -> AutopilotConfig {
    AutopilotConfig {
        enabled: true,
        auto_merge: true,
        ..Default::default()
    }
}

fn controller(
    path: &std::path::Path,
    host: &Arc<MockPullRequestHost>,
) -> (AutopilotController, Arc<SqliteRecordStore>) {
    let store = Arc::new(SqliteRecordStore::new(path).expect("open store"));
    (
        AutopilotController::new(config(), host.clone(), store.clone()),
        store,
    )
}

#[tokio::test]
async fn test_record_resumes_from_persisted_stage() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("autopilot.db");
    let host = Arc::new(MockPullRequestHost::new());
    host.add_open_pr(17);

    {
        let (first, _store) = controller(&db, &host);
        first
            .track_pr(fixtures::pr_created(17), PrStage::Created)
            .await
            .unwrap();
        assert_eq!(first.advance(17).await.unwrap(), Some(PrStage::CiPending));
    }

    let (second, _store) = controller(&db, &host);
    assert_eq!(second.restore().unwrap(), 1);
    let record = second.record(17).unwrap();
    assert_eq!(record.stage, PrStage::CiPending);
    assert_eq!(record.task_id, "task-17");
    assert!(record.ci_wait_started_at.is_some());

    host.set_ci_status("sha-17", CiStatus::Success);
    assert_eq!(second.advance(17).await.unwrap(), Some(PrStage::CiPassed));
    assert_eq!(second.advance(17).await.unwrap(), Some(PrStage::Merging));
    assert_eq!(second.advance(17).await.unwrap(), Some(PrStage::Merged));
    assert_eq!(host.merges(), vec![17]);
    assert!(second.active_records().is_empty());
}

#[tokio::test]
async fn test_finished_records_are_not_resumed() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("autopilot.db");
    let host = Arc::new(MockPullRequestHost::new());
    host.add_open_pr(3);
    host.update_pr(3, |pr| pr.mergeable = Some(false));

    {
        let (first, store) = controller(&db, &host);
        first
            .track_pr(fixtures::pr_created(3), PrStage::Created)
            .await
            .unwrap();
        assert_eq!(first.advance(3).await.unwrap(), Some(PrStage::MergeFailed));
        assert_eq!(store.get(3).unwrap().unwrap().stage, PrStage::MergeFailed);
    }

    let (second, _store) = controller(&db, &host);
    assert_eq!(second.restore().unwrap(), 0);
    assert!(second.record(3).is_none());
}

#[tokio::test]
async fn test_redelivered_event_after_restart_is_ignored() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("autopilot.db");
    let host = Arc::new(MockPullRequestHost::new());
    host.add_open_pr(4);
    host.update_pr(4, |pr| pr.mergeable = Some(false));

    {
        let (first, _store) = controller(&db, &host);
        first.on_pr_created(fixtures::pr_created(4)).await;
        assert_eq!(first.advance(4).await.unwrap(), Some(PrStage::MergeFailed));
    }

    let (second, store) = controller(&db, &host);
    second.restore().unwrap();
    second.on_pr_created(fixtures::pr_created(4)).await;

    assert!(second.record(4).is_none());
    assert_eq!(store.get(4).unwrap().unwrap().stage, PrStage::MergeFailed);
}

#[tokio::test]
async fn test_duplicate_events_yield_one_record() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(MockPullRequestHost::new());
    let (controller, store) = controller(&dir.path().join("autopilot.db"), &host);
    let controller = Arc::new(controller);

    let mut deliveries = Vec::new();
    for _ in 0..8 {
        let controller = Arc::clone(&controller);
        deliveries.push(tokio::spawn(async move {
            controller.on_pr_created(fixtures::pr_created(5)).await;
        }));
    }
    for delivery in deliveries {
        delivery.await.unwrap();
    }

    assert_eq!(controller.active_records().len(), 1);
    assert_eq!(store.list().unwrap().len(), 1);
}

//! Router tests against an in-process server with mock collaborators.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use shipyard_core::testing::wait_until;
use shipyard_core::ExecutionResult;
use tokio_util::sync::CancellationToken;

use common::{fixtures, TestConfig, TestFixture};

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert!(response.body["version"].is_string());
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["server"]["port"], 8080);
    assert_eq!(response.body["orchestrator"]["max_workers"], 2);
    assert!(response.body.get("github").is_none());
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/nope").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tasks_empty() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/tasks").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, serde_json::json!([]));

    let response = fixture.get("/api/v1/tasks/running").await;
    assert_eq!(response.body, serde_json::json!([]));
}

#[tokio::test]
async fn test_completed_and_failed_tasks_are_listed() {
    let fixture = TestFixture::with_config(TestConfig::with_orchestrator()).await;
    let orchestrator = fixture.orchestrator.clone().unwrap();
    fixture
        .executor
        .set_result("broken", ExecutionResult::failure("build failed"));

    orchestrator.queue_task(fixtures::task("ok")).unwrap();
    orchestrator.queue_task(fixtures::task("broken")).unwrap();

    let monitor = fixture.monitor.clone();
    assert!(
        wait_until(Duration::from_secs(2), || {
            monitor.get_all().iter().all(|t| t.phase.is_terminal()) && monitor.len() == 2
        })
        .await
    );

    let response = fixture.get("/api/v1/tasks").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.as_array().unwrap().len(), 2);

    let response = fixture.get("/api/v1/tasks/broken").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["phase"], "failed");
    assert_eq!(response.body["error"], "build failed");

    let response = fixture.get("/api/v1/tasks/ok").await;
    assert_eq!(response.body["phase"], "completed");

    let response = fixture.get("/api/v1/tasks/missing").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("missing"));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_orchestrator_status() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/orchestrator/status").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["available"], false);
    assert_eq!(response.body["running"], false);

    let fixture = TestFixture::with_config(TestConfig::with_orchestrator()).await;
    let response = fixture.get("/api/v1/orchestrator/status").await;
    assert_eq!(response.body["available"], true);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["workers"], 2);
    assert_eq!(response.body["queue_capacity"], 100);
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_poller_unavailable_without_source() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/poller/status").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_poller_status_and_reset() {
    let fixture = TestFixture::with_config(TestConfig::with_all()).await;
    let poller = fixture.poller.clone().unwrap();
    fixture
        .source
        .set_items(vec![fixtures::work_item("1"), fixtures::work_item("2")]);

    assert_eq!(poller.poll_once(&CancellationToken::new()).await, 2);
    poller.wait_for_active().await;

    let response = fixture.get("/api/v1/poller/status").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["source"], "mock");
    assert_eq!(response.body["processed_count"], 2);
    assert_eq!(response.body["dispatched"], 2);

    let response = fixture.post("/api/v1/poller/reset").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["cleared"], 2);
    assert_eq!(poller.processed_count(), 0);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_autopilot_disabled() {
    let fixture = TestFixture::new().await;
    for path in ["/api/v1/autopilot/prs", "/api/v1/autopilot/status"] {
        let response = fixture.get(path).await;
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE, "{}", path);
    }
    let response = fixture.post("/api/v1/autopilot/resume").await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_pr_from_task_is_tracked() {
    let fixture = TestFixture::with_config(TestConfig::with_all()).await;
    let orchestrator = fixture.orchestrator.clone().unwrap();
    let autopilot = fixture.autopilot.clone().unwrap();
    fixture.executor.set_result(
        "with-pr",
        ExecutionResult::success()
            .with_pr_url("https://github.com/acme/app/pull/7")
            .with_commit_sha("abc123"),
    );

    orchestrator.queue_task(fixtures::task("with-pr")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || autopilot.record(7).is_some()).await);

    let response = fixture.get("/api/v1/autopilot/prs").await;
    assert_eq!(response.status, StatusCode::OK);
    let prs = response.body.as_array().unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0]["pr_number"], 7);
    assert_eq!(prs[0]["stage"], "created");

    let response = fixture.get("/api/v1/autopilot/prs/7").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["task_id"], "with-pr");

    let response = fixture.get("/api/v1/autopilot/prs/8").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = fixture.get("/api/v1/autopilot/status").await;
    assert_eq!(response.body["paused"], false);
    assert_eq!(response.body["tracked"], 1);
    assert_eq!(response.body["blocked"], serde_json::json!([]));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_resume_when_not_paused() {
    let fixture = TestFixture::with_config(TestConfig::with_all()).await;
    let response = fixture.post("/api/v1/autopilot/resume").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["message"], "Autopilot was not paused");
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("shipyard_http_requests_total"));
    assert!(body.contains("shipyard_tasks_by_phase"));
}

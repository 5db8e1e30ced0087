//! Common test utilities for API testing with mocks.
//!
//! Builds the router in-process with mock collaborators so handlers can be
//! exercised through `tower::ServiceExt::oneshot` without a network.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use shipyard_core::testing::{MockExecutor, MockPullRequestHost, MockWorkSource};
use shipyard_core::{
    AutopilotController, Config, DefaultPlanner, DispatchHandler, InMemoryRecordStore, Monitor,
    Orchestrator, Poller,
};
use shipyard_server::api::create_router;
use shipyard_server::state::AppState;

/// Re-export fixtures for test convenience
pub use shipyard_core::testing::fixtures;

/// In-process server with controllable mocks.
#[allow(dead_code)]
pub struct TestFixture {
    pub router: Router,
    pub monitor: Arc<Monitor>,
    pub executor: Arc<MockExecutor>,
    pub source: Arc<MockWorkSource>,
    pub host: Arc<MockPullRequestHost>,
    pub orchestrator: Option<Arc<Orchestrator>>,
    pub poller: Option<Arc<Poller>>,
    pub autopilot: Option<Arc<AutopilotController>>,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Which optional components the fixture wires up.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    pub orchestrator: bool,
    pub poller: bool,
    pub autopilot: bool,
}

#[allow(dead_code)]
impl TestConfig {
    pub fn with_orchestrator() -> Self {
        Self {
            orchestrator: true,
            ..Default::default()
        }
    }

    pub fn with_all() -> Self {
        Self {
            orchestrator: true,
            poller: true,
            autopilot: true,
        }
    }
}

#[allow(dead_code)]
impl TestFixture {
    /// Fixture with only the monitor wired (no executor, no GitHub).
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let mut config = Config::default();
        config.autopilot.enabled = test_config.autopilot;

        let monitor = Arc::new(Monitor::new());
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(20)));
        let source = Arc::new(MockWorkSource::new());
        let host = Arc::new(MockPullRequestHost::new());

        let autopilot = test_config.autopilot.then(|| {
            Arc::new(AutopilotController::new(
                config.autopilot.clone(),
                Arc::clone(&host) as _,
                Arc::new(InMemoryRecordStore::default()),
            ))
        });

        let orchestrator = (test_config.orchestrator || test_config.poller).then(|| {
            let mut orchestrator = Orchestrator::new(
                config.orchestrator.clone(),
                Arc::clone(&executor) as _,
                Arc::clone(&monitor),
            );
            if let Some(controller) = &autopilot {
                orchestrator = orchestrator.with_pr_listener(Arc::clone(controller) as _);
            }
            let orchestrator = Arc::new(orchestrator);
            orchestrator.start();
            orchestrator
        });

        let poller = match (&orchestrator, test_config.poller) {
            (Some(orchestrator), true) => {
                let handler = DispatchHandler::new(
                    Arc::new(DefaultPlanner::from_config(&config.orchestrator)),
                    Arc::clone(orchestrator),
                );
                Some(Arc::new(
                    Poller::from_config(&config.poller, Arc::clone(&source) as _, Arc::new(handler)),
                ))
            }
            _ => None,
        };

        let mut state = AppState::new(config, Arc::clone(&monitor));
        if let Some(orchestrator) = &orchestrator {
            state = state.with_orchestrator(Arc::clone(orchestrator));
        }
        if let Some(poller) = &poller {
            state = state.with_poller(Arc::clone(poller));
        }
        if let Some(controller) = &autopilot {
            state = state.with_autopilot(Arc::clone(controller));
        }

        Self {
            router: create_router(Arc::new(state)),
            monitor,
            executor,
            source,
            host,
            orchestrator,
            poller,
            autopilot,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    /// Raw response body, for non-JSON endpoints.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&body_bytes).into_owned())
    }

    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Stop the orchestrator so worker tasks do not outlive the test.
    pub async fn shutdown(&self) {
        if let Some(poller) = &self.poller {
            poller.wait_for_active().await;
        }
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.stop().await;
        }
    }
}

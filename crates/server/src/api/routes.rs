use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::{autopilot, handlers, middleware::metrics_middleware, poller, tasks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Tasks
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/running", get(tasks::list_running))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/orchestrator/status", get(tasks::orchestrator_status))
        // Ingestion
        .route("/poller/status", get(poller::get_status))
        .route("/poller/reset", post(poller::reset))
        // Autopilot
        .route("/autopilot/status", get(autopilot::get_status))
        .route("/autopilot/prs", get(autopilot::list_prs))
        .route("/autopilot/prs/{number}", get(autopilot::get_pr))
        .route("/autopilot/resume", post(autopilot::resume));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(metrics_middleware)),
        )
}

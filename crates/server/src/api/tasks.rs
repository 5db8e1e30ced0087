//! Task and orchestrator API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use shipyard_core::{OrchestratorStatus, TaskState};

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Orchestrator status response
#[derive(Debug, Serialize)]
pub struct OrchestratorStatusResponse {
    /// Whether an executor is configured and the orchestrator exists
    pub available: bool,
    #[serde(flatten)]
    pub status: OrchestratorStatus,
}

/// All tasks known to the monitor, oldest first.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Vec<TaskState>> {
    Json(state.monitor().get_all())
}

pub async fn list_running(State(state): State<Arc<AppState>>) -> Json<Vec<TaskState>> {
    Json(state.monitor().get_running())
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskState>, impl IntoResponse> {
    state.monitor().get(&id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("task not found: {}", id)),
        )
    })
}

pub async fn orchestrator_status(
    State(state): State<Arc<AppState>>,
) -> Json<OrchestratorStatusResponse> {
    match state.orchestrator() {
        Some(orch) => Json(OrchestratorStatusResponse {
            available: true,
            status: orch.status(),
        }),
        None => Json(OrchestratorStatusResponse {
            available: false,
            status: OrchestratorStatus::default(),
        }),
    }
}

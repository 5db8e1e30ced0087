//! Autopilot API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use shipyard_core::{AutopilotController, AutopilotRecord};

use super::handlers::ErrorResponse;
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct AutopilotStatusResponse {
    pub paused: bool,
    pub failure_count: u64,
    pub tracked: usize,
    /// PRs skipped after repeated errors.
    pub blocked: Vec<u64>,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn controller(state: &AppState) -> Result<&AutopilotController, ApiError> {
    state.autopilot().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("Autopilot not enabled"),
        )
    })
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AutopilotStatusResponse>, ApiError> {
    let autopilot = controller(&state)?;
    Ok(Json(AutopilotStatusResponse {
        paused: autopilot.is_paused(),
        failure_count: autopilot.failure_count(),
        tracked: autopilot.active_records().len(),
        blocked: autopilot.blocked_prs(),
        poll_interval_ms: autopilot.current_interval().as_millis() as u64,
    }))
}

/// Tracked pull requests ordered by number.
pub async fn list_prs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AutopilotRecord>>, ApiError> {
    Ok(Json(controller(&state)?.active_records()))
}

pub async fn get_pr(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u64>,
) -> Result<Json<AutopilotRecord>, ApiError> {
    controller(&state)?.record(number).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("pull request #{} is not tracked", number)),
        )
    })
}

/// Reset the circuit breaker after repeated failures paused autopilot, and
/// unblock PRs skipped after repeated errors.
pub async fn resume(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let autopilot = controller(&state)?;
    let was_paused = autopilot.is_paused();
    autopilot.reset_circuit_breaker();
    let message = if was_paused {
        "Autopilot resumed"
    } else {
        "Autopilot was not paused"
    };
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

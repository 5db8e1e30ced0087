use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use shipyard_core::PollerStatus;

use super::handlers::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub cleared: usize,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PollerStatus>, impl IntoResponse> {
    match state.poller() {
        Some(poller) => Ok(Json(poller.status())),
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("Poller not available. Configure [github] and an [executor]."),
        )),
    }
}

/// Forget processed items so open ones are dispatched again.
pub async fn reset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, impl IntoResponse> {
    match state.poller() {
        Some(poller) => {
            let cleared = poller.processed_count();
            poller.reset();
            Ok(Json(ResetResponse { cleared }))
        }
        None => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorResponse::new("Poller not available"),
        )),
    }
}

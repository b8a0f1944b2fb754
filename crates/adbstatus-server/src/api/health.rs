//! Health and status endpoints.

use adbstatus_core::{HealthResponse, StatusResponse};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

/// Creates the router for `/health` and `/status`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(get_status))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    operation_id = "healthCheck",
    summary = "Check service health",
    description = "Returns a constant `ok` with the daemon version. Use this endpoint \
        for liveness checks.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// Monitor status endpoint.
#[utoipa::path(
    get,
    path = "/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get monitor status",
    description = "Returns the monitor's lifecycle phase, the number of devices in the \
        current snapshot and when it was captured, the last sleep/wake \
        notification and the daemon's uptime.",
    responses(
        (status = 200, description = "Current monitor status", body = StatusResponse)
    )
)]
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse::from_state(&state.devices, state.started_at))
}

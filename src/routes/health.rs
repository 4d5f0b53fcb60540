use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::models::api::HealthResponse;
use crate::models::stats::OverallHealth;

/// GET /health: service status with per-instance health.
///
/// `503` only when no instance is online; a degraded pool still serves.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.health().await;
    let status_code = match report.status {
        OverallHealth::Healthy | OverallHealth::Degraded => StatusCode::OK,
        OverallHealth::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(HealthResponse::from(report)))
}

/// GET /probe: liveness of the queue itself, mirroring an instance's probe.
pub async fn probe() -> Json<Value> {
    Json(json!({ "message": "OmniParser queue is ready" }))
}

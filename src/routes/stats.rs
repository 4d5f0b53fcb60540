use axum::extract::{Query, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::{LimitQuery, StatsResponse};
use crate::models::stats::QueueDepthPoint;

const DEFAULT_DEPTH_LIMIT: usize = 100;

/// GET /stats: aggregate counters; times in seconds.
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::from(state.stats().await))
}

/// GET /queue-depth: recent depth samples, oldest first.
pub async fn queue_depth(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<QueueDepthPoint>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEPTH_LIMIT)
        .min(state.settings.depth_history_size);
    Json(state.stats.depth_history(limit).await)
}

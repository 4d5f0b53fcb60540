use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::instance::{InstanceConfig, InstanceSnapshot};
use crate::routes::error::ApiError;

/// GET /instances: every configured instance with its live state.
pub async fn list_instances(State(state): State<AppState>) -> Json<Vec<InstanceSnapshot>> {
    Json(state.registry.snapshots().await)
}

/// PUT /instances: replace the configured instance set.
pub async fn replace_instances(
    State(state): State<AppState>,
    Json(instances): Json<Vec<InstanceConfig>>,
) -> Result<Json<Vec<InstanceSnapshot>>, ApiError> {
    let instances = instances
        .into_iter()
        .map(|mut i| {
            i.url = i.url.trim_end_matches('/').to_string();
            i
        })
        .collect();
    state.reconfigure(instances).await?;
    Ok(Json(state.registry.snapshots().await))
}

pub mod error;
pub mod health;
pub mod instances;
pub mod jobs;
pub mod metrics;
pub mod stats;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// HTTP surface of the queue. `/metrics` is mounted separately by the binary
/// since it carries its own state.
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/probe", get(health::probe))
        .route("/parse", post(jobs::submit_parse))
        .route("/jobs", post(jobs::submit_upload).get(jobs::list_jobs))
        .route("/jobs/{job_id}", get(jobs::get_job))
        .route("/stats", get(stats::get_stats))
        .route("/queue-depth", get(stats::queue_depth))
        .route(
            "/instances",
            get(instances::list_instances).put(instances::replace_instances),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

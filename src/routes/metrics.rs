use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

/// Prometheus scrape endpoint for queue and instance metrics.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the queue emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "parse_jobs_submitted_total",
        "Parse jobs accepted into the queue"
    );
    metrics::describe_counter!(
        "parse_jobs_rejected_total",
        "Parse jobs rejected because the queue was full"
    );
    metrics::describe_counter!(
        "parse_jobs_completed_total",
        "Parse jobs that reached a terminal state, by status"
    );
    metrics::describe_counter!(
        "parse_jobs_retried_total",
        "Parse jobs re-queued after a transient failure"
    );
    metrics::describe_histogram!(
        "parse_processing_seconds",
        "Time an OmniParser instance spent on a job"
    );
    metrics::describe_histogram!(
        "parse_queue_wait_seconds",
        "Time a job waited in the queue before dispatch"
    );
    metrics::describe_gauge!("parse_queue_depth", "Jobs currently waiting in the queue");
    metrics::describe_gauge!(
        "omniparser_instance_online",
        "1 when the instance is online, 0 otherwise"
    );
    metrics::describe_gauge!(
        "omniparser_instance_in_flight",
        "Jobs currently executing on the instance"
    );
}

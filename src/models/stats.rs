use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use crate::models::instance::InstanceSnapshot;

/// Aggregate counters and averages. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub rejected_requests: u64,
    pub retried_requests: u64,
    pub current_queue_size: usize,
    pub requests_per_minute: f64,
    pub avg_processing_time_ms: f64,
    pub avg_queue_wait_time_ms: f64,
    pub worker_running: bool,
    pub uptime_seconds: u64,
}

/// One sample of the queue depth time series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueDepthPoint {
    pub timestamp: DateTime<Utc>,
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Service health together with the per-instance view.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallHealth,
    pub queue_size: usize,
    pub worker_running: bool,
    pub uptime_seconds: u64,
    pub instances: Vec<InstanceSnapshot>,
}

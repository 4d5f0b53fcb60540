use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::instance::{InstanceSnapshot, InstanceStatus};
use crate::models::job::{ErrorKind, JobRecord};
use crate::models::parse::ParseOptions;
use crate::models::stats::{HealthReport, QueueStats};

/// Body of `POST /parse`, compatible with an OmniParser instance's own endpoint.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(length(min = 1))]
    pub base64_image: String,

    #[garde(dive)]
    #[serde(flatten)]
    pub options: ParseOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Response after a job is admitted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub queue_position: usize,
}

/// Row of `GET /jobs`.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: String,
    /// Milliseconds.
    pub processing_time: Option<u64>,
    /// Milliseconds.
    pub queue_wait_time: Option<u64>,
    pub image_size: usize,
    pub timestamp: DateTime<Utc>,
    pub assigned_instance: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            status: record.status.wire_name().to_string(),
            processing_time: record.processing_time,
            queue_wait_time: record.queue_wait_time,
            image_size: record.image_size,
            timestamp: record.completed_at.unwrap_or(record.enqueued_at),
            assigned_instance: record.assigned_instance.clone(),
            attempt: record.attempt,
            error_kind: record.error_kind,
            error: record.error.clone(),
        }
    }
}

/// Body of `GET /stats`. Times are in seconds at this boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub current_queue_size: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub timeout_requests: u64,
    pub rejected_requests: u64,
    pub retried_requests: u64,
    pub requests_per_minute: f64,
    pub avg_processing_time: f64,
    pub avg_queue_wait_time: f64,
    pub worker_running: bool,
    pub uptime_seconds: u64,
}

impl From<QueueStats> for StatsResponse {
    fn from(stats: QueueStats) -> Self {
        Self {
            current_queue_size: stats.current_queue_size,
            total_requests: stats.total_requests,
            successful_requests: stats.successful_requests,
            failed_requests: stats.failed_requests,
            timeout_requests: stats.timeout_requests,
            rejected_requests: stats.rejected_requests,
            retried_requests: stats.retried_requests,
            requests_per_minute: stats.requests_per_minute,
            avg_processing_time: stats.avg_processing_time_ms / 1000.0,
            avg_queue_wait_time: stats.avg_queue_wait_time_ms / 1000.0,
            worker_running: stats.worker_running,
            uptime_seconds: stats.uptime_seconds,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceStatusItem {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub status: InstanceStatus,
    pub in_flight: usize,
    pub last_checked: Option<DateTime<Utc>>,
}

impl From<&InstanceSnapshot> for InstanceStatusItem {
    fn from(snapshot: &InstanceSnapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            display_name: snapshot.display_name.clone(),
            url: snapshot.url.clone(),
            status: snapshot.status,
            in_flight: snapshot.in_flight,
            last_checked: snapshot.last_checked,
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_size: usize,
    pub worker_running: bool,
    pub uptime_seconds: u64,
    pub omniparser_status: Vec<InstanceStatusItem>,
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        Self {
            status: report.status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            queue_size: report.queue_size,
            worker_running: report.worker_running,
            uptime_seconds: report.uptime_seconds,
            omniparser_status: report.instances.iter().map(InstanceStatusItem::from).collect(),
        }
    }
}

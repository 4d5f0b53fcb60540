use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::parse::{ParseOptions, ParseResult};

pub type JobId = Uuid;

/// Lifecycle state of a parsing job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Dispatched,
    Succeeded,
    Failed,
    TimedOut,
    Rejected,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Rejected
        )
    }

    /// Status string used by the dashboard-facing endpoints.
    pub fn wire_name(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Dispatched => "processing",
            JobStatus::Succeeded => "success",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timeout",
            JobStatus::Rejected => "rejected",
        }
    }
}

/// Short machine-readable reason attached to a job that did not succeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    QueueFull,
    InstanceUnavailable,
    Transient,
    Permanent,
    DeadlineExceeded,
}

/// Where a job that failed transiently re-enters the queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RetryReentry {
    Head,
    #[default]
    Tail,
}

/// A parsing job owned by the queue or the dispatcher.
///
/// Only one component holds a `Job` at a time: the queue while it is
/// `Queued`, the dispatcher while it is `Dispatched`. Readers see
/// [`JobRecord`] snapshots.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub payload: Arc<Vec<u8>>,
    pub options: ParseOptions,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_instance: Option<String>,
    pub attempt: u32,
    pub result: Option<ParseResult>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    /// Monotonic deadline while queued (`enqueued_at + max_queue_wait`).
    pub queue_deadline: Instant,
    /// Monotonic deadline while dispatched (`dispatched_at + max_processing_wait`).
    pub processing_deadline: Option<Instant>,
    /// Start of the current stay in the queue.
    pub(crate) queued_since: Instant,
    /// Time spent queued across every dispatched attempt.
    pub(crate) accumulated_wait: Duration,
    pub(crate) responder: Option<oneshot::Sender<JobRecord>>,
}

impl Job {
    pub fn new(
        payload: Vec<u8>,
        options: ParseOptions,
        max_queue_wait: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            payload: Arc::new(payload),
            options,
            status: JobStatus::Queued,
            enqueued_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
            assigned_instance: None,
            attempt: 0,
            result: None,
            error_kind: None,
            error: None,
            queue_deadline: now + max_queue_wait,
            processing_deadline: None,
            queued_since: now,
            accumulated_wait: Duration::ZERO,
            responder: None,
        }
    }

    pub fn image_size(&self) -> usize {
        self.payload.len()
    }

    /// Milliseconds spent queued before dispatch, summed over attempts.
    ///
    /// Time on an instance before a retry is not counted.
    pub fn queue_wait_ms(&self) -> Option<u64> {
        (self.attempt > 0).then(|| self.accumulated_wait.as_millis() as u64)
    }

    /// Leave the queue for an instance.
    pub(crate) fn mark_dispatched(&mut self, now: Instant) {
        self.accumulated_wait += now.saturating_duration_since(self.queued_since);
    }

    /// Re-enter the queue after a failed attempt.
    pub(crate) fn mark_requeued(&mut self, now: Instant) {
        self.status = JobStatus::Queued;
        self.queued_since = now;
    }

    pub fn record(&self) -> JobRecord {
        let processing_time = match (self.dispatched_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        };
        JobRecord {
            job_id: self.id,
            status: self.status,
            image_size: self.image_size(),
            enqueued_at: self.enqueued_at,
            dispatched_at: self.dispatched_at,
            completed_at: self.completed_at,
            assigned_instance: self.assigned_instance.clone(),
            attempt: self.attempt,
            queue_wait_time: self.queue_wait_ms(),
            processing_time,
            error_kind: self.error_kind,
            error: self.error.clone(),
            result: self.result.clone(),
        }
    }
}

/// Read-only snapshot of a job, as kept in the history ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub status: JobStatus,
    pub image_size: usize,
    pub enqueued_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_instance: Option<String>,
    pub attempt: u32,
    /// Milliseconds.
    pub queue_wait_time: Option<u64>,
    /// Milliseconds.
    pub processing_time: Option<u64>,
    pub error_kind: Option<ErrorKind>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ParseResult>,
}

impl JobRecord {
    /// Record for a submission turned away at admission.
    pub fn rejected(image_size: usize, capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            status: JobStatus::Rejected,
            image_size,
            enqueued_at: now,
            dispatched_at: None,
            completed_at: Some(now),
            assigned_instance: None,
            attempt: 0,
            queue_wait_time: None,
            processing_time: None,
            error_kind: Some(ErrorKind::QueueFull),
            error: Some(format!("queue is full ({capacity} jobs waiting)")),
            result: None,
        }
    }
}

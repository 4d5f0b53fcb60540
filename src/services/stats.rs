use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::models::instance::{InstanceSnapshot, InstanceStatus};
use crate::models::job::{JobId, JobRecord, JobStatus};
use crate::models::stats::{HealthReport, OverallHealth, QueueDepthPoint, QueueStats};

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Counters {
    successful: u64,
    failed: u64,
    timed_out: u64,
    rejected: u64,
    retried: u64,
    processing_ms_total: u64,
    processing_samples: u64,
    wait_ms_total: u64,
    wait_samples: u64,
    /// Terminal transitions inside the rate window.
    recent: VecDeque<Instant>,
}

impl Counters {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.recent.front() {
            if now.saturating_duration_since(*front) > RATE_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Bounded history of job records, oldest evicted first.
#[derive(Debug)]
pub struct JobHistory {
    records: VecDeque<JobRecord>,
    capacity: usize,
}

impl JobHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Insert a record, or replace the existing one with the same id.
    pub fn upsert(&mut self, record: JobRecord) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .rev()
            .find(|r| r.job_id == record.job_id)
        {
            *existing = record;
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn get(&self, id: JobId) -> Option<JobRecord> {
        self.records.iter().rev().find(|r| r.job_id == id).cloned()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<JobRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded queue depth time series.
#[derive(Debug)]
pub struct DepthSeries {
    points: VecDeque<QueueDepthPoint>,
    capacity: usize,
}

impl DepthSeries {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, point: QueueDepthPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// The last `limit` points, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<QueueDepthPoint> {
        let skip = self.points.len().saturating_sub(limit);
        self.points.iter().skip(skip).copied().collect()
    }
}

/// Running counters, latency accumulators and bounded histories.
///
/// Counters for one terminal transition are updated under a single lock so
/// `total == successful + failed + timed_out` holds for every snapshot.
pub struct StatsAggregator {
    counters: Mutex<Counters>,
    history: RwLock<JobHistory>,
    depth: RwLock<DepthSeries>,
    worker_running: AtomicBool,
    started_at: Instant,
}

impl StatsAggregator {
    pub fn new(job_history_size: usize, depth_history_size: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            history: RwLock::new(JobHistory::new(job_history_size)),
            depth: RwLock::new(DepthSeries::new(depth_history_size)),
            worker_running: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Track a queued or dispatched job.
    pub async fn record_progress(&self, record: JobRecord) {
        self.history.write().await.upsert(record);
    }

    pub async fn record_rejected(&self, record: JobRecord) {
        self.counters.lock().await.rejected += 1;
        metrics::counter!("parse_jobs_rejected_total").increment(1);
        self.history.write().await.upsert(record);
    }

    pub async fn record_retry(&self, record: JobRecord) {
        self.counters.lock().await.retried += 1;
        metrics::counter!("parse_jobs_retried_total").increment(1);
        self.history.write().await.upsert(record);
    }

    /// Count a job that reached `Succeeded`, `Failed` or `TimedOut`.
    pub async fn record_terminal(&self, record: JobRecord) {
        let now = Instant::now();
        {
            let mut counters = self.counters.lock().await;
            match record.status {
                JobStatus::Succeeded => counters.successful += 1,
                JobStatus::Failed => counters.failed += 1,
                JobStatus::TimedOut => counters.timed_out += 1,
                other => {
                    tracing::warn!(job_id = %record.job_id, status = %other, "Ignoring non-terminal status in stats");
                    return;
                }
            }
            // Only attempts that ran to completion count toward processing time.
            let executed = matches!(record.status, JobStatus::Succeeded | JobStatus::Failed);
            if let Some(ms) = record.processing_time.filter(|_| executed) {
                counters.processing_ms_total += ms;
                counters.processing_samples += 1;
                metrics::histogram!("parse_processing_seconds").record(ms as f64 / 1000.0);
            }
            if let Some(ms) = record.queue_wait_time {
                counters.wait_ms_total += ms;
                counters.wait_samples += 1;
                metrics::histogram!("parse_queue_wait_seconds").record(ms as f64 / 1000.0);
            }
            counters.recent.push_back(now);
            counters.prune(now);
        }
        metrics::counter!("parse_jobs_completed_total", "status" => record.status.wire_name())
            .increment(1);
        self.history.write().await.upsert(record);
    }

    pub async fn record_depth(&self, depth: usize) {
        metrics::gauge!("parse_queue_depth").set(depth as f64);
        self.depth.write().await.push(QueueDepthPoint {
            timestamp: Utc::now(),
            depth,
        });
    }

    pub fn set_worker_running(&self, running: bool) {
        self.worker_running.store(running, Ordering::SeqCst);
    }

    pub fn worker_running(&self) -> bool {
        self.worker_running.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub async fn snapshot(&self, current_queue_size: usize) -> QueueStats {
        let mut counters = self.counters.lock().await;
        counters.prune(Instant::now());

        let window_secs = self.uptime().min(RATE_WINDOW).as_secs_f64().max(1.0);
        let requests_per_minute = counters.recent.len() as f64 * 60.0 / window_secs;

        QueueStats {
            total_requests: counters.successful + counters.failed + counters.timed_out,
            successful_requests: counters.successful,
            failed_requests: counters.failed,
            timeout_requests: counters.timed_out,
            rejected_requests: counters.rejected,
            retried_requests: counters.retried,
            current_queue_size,
            requests_per_minute,
            avg_processing_time_ms: average(counters.processing_ms_total, counters.processing_samples),
            avg_queue_wait_time_ms: average(counters.wait_ms_total, counters.wait_samples),
            worker_running: self.worker_running(),
            uptime_seconds: self.uptime().as_secs(),
        }
    }

    pub async fn jobs(&self, limit: usize) -> Vec<JobRecord> {
        self.history.read().await.recent(limit)
    }

    pub async fn job(&self, id: JobId) -> Option<JobRecord> {
        self.history.read().await.get(id)
    }

    pub async fn depth_history(&self, limit: usize) -> Vec<QueueDepthPoint> {
        self.depth.read().await.recent(limit)
    }

    pub fn health(&self, instances: Vec<InstanceSnapshot>, queue_size: usize) -> HealthReport {
        HealthReport {
            status: overall_health(&instances),
            queue_size,
            worker_running: self.worker_running(),
            uptime_seconds: self.uptime().as_secs(),
            instances,
        }
    }
}

fn average(total: u64, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

/// All online: healthy. Some online: degraded. None online (or none configured): unhealthy.
pub fn overall_health(instances: &[InstanceSnapshot]) -> OverallHealth {
    let online = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Online)
        .count();
    if online == 0 {
        OverallHealth::Unhealthy
    } else if online == instances.len() {
        OverallHealth::Healthy
    } else {
        OverallHealth::Degraded
    }
}

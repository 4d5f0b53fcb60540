use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::Instant;

use crate::models::job::{Job, JobId, JobRecord, RetryReentry};
use crate::models::parse::ParseOptions;
use crate::services::stats::StatsAggregator;

/// Handle returned to a producer whose job was admitted.
#[derive(Debug)]
pub struct Submission {
    pub job_id: JobId,
    /// 1-based position in the queue at admission.
    pub queue_position: usize,
    completion: oneshot::Receiver<JobRecord>,
}

impl Submission {
    /// Wait for the job to reach a terminal state.
    ///
    /// Returns `None` only if the dispatcher shut down before finishing it.
    pub async fn wait(self) -> Option<JobRecord> {
        self.completion.await.ok()
    }
}

/// Bounded FIFO holding area for jobs awaiting dispatch.
///
/// `submit` never waits for capacity: it admits or rejects immediately.
/// Everything else is reserved for the dispatcher.
pub struct JobQueue {
    pending: Mutex<VecDeque<Job>>,
    max_size: usize,
    max_queue_wait: Duration,
    stats: Arc<StatsAggregator>,
    dispatcher_wake: Arc<Notify>,
}

impl JobQueue {
    pub fn new(
        max_size: usize,
        max_queue_wait: Duration,
        stats: Arc<StatsAggregator>,
        dispatcher_wake: Arc<Notify>,
    ) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
            max_queue_wait,
            stats,
            dispatcher_wake,
        }
    }

    /// Admit a parsing job, or reject it with `QueueFull` when at capacity.
    pub async fn submit(
        &self,
        payload: Vec<u8>,
        options: ParseOptions,
    ) -> Result<Submission, SubmitError> {
        let image_size = payload.len();
        let mut pending = self.pending.lock().await;

        if pending.len() >= self.max_size {
            drop(pending);
            let record = JobRecord::rejected(image_size, self.max_size);
            tracing::warn!(
                job_id = %record.job_id,
                image_size,
                capacity = self.max_size,
                "Queue full, rejecting job"
            );
            self.stats.record_rejected(record).await;
            return Err(SubmitError::QueueFull {
                capacity: self.max_size,
            });
        }

        let (tx, rx) = oneshot::channel();
        let mut job = Job::new(payload, options, self.max_queue_wait);
        job.responder = Some(tx);
        let job_id = job.id;

        // Recorded under the queue lock so the dispatcher's later updates win.
        self.stats.record_progress(job.record()).await;
        pending.push_back(job);
        let queue_position = pending.len();
        drop(pending);

        metrics::counter!("parse_jobs_submitted_total").increment(1);
        tracing::debug!(job_id = %job_id, image_size, queue_position, "Job admitted");
        self.dispatcher_wake.notify_one();

        Ok(Submission {
            job_id,
            queue_position,
            completion: rx,
        })
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Oldest-first removal of the next job to dispatch.
    pub(crate) async fn pop_next(&self) -> Option<Job> {
        self.pending.lock().await.pop_front()
    }

    /// Put back a job the dispatcher popped but could not place.
    pub(crate) async fn restore(&self, job: Job) {
        self.pending.lock().await.push_front(job);
    }

    /// Re-admit a job after a transient failure. Bypasses the capacity check:
    /// the job was already admitted once.
    pub(crate) async fn requeue(&self, mut job: Job, reentry: RetryReentry) {
        job.mark_requeued(Instant::now());
        let mut pending = self.pending.lock().await;
        match reentry {
            RetryReentry::Head => pending.push_front(job),
            RetryReentry::Tail => pending.push_back(job),
        }
    }

    /// Remove every job whose queue deadline has passed.
    pub(crate) async fn take_expired(&self, now: Instant) -> Vec<Job> {
        let mut pending = self.pending.lock().await;
        if !pending.iter().any(|job| job.queue_deadline <= now) {
            return Vec::new();
        }
        let (expired, waiting): (VecDeque<Job>, VecDeque<Job>) = pending
            .drain(..)
            .partition(|job| job.queue_deadline <= now);
        *pending = waiting;
        expired.into()
    }

    /// Earliest queue deadline among waiting jobs.
    pub(crate) async fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .lock()
            .await
            .iter()
            .map(|job| job.queue_deadline)
            .min()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Queue is full ({capacity} jobs waiting), retry later")]
    QueueFull { capacity: usize },
}

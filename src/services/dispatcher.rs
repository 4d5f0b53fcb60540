use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::QueueSettings;
use crate::models::instance::InstanceStatus;
use crate::models::job::{ErrorKind, Job, JobId, JobStatus, RetryReentry};
use crate::services::balancer::{Candidate, LeastLoaded};
use crate::services::executor::{ExecutionRequest, JobExecutor, Outcome};
use crate::services::queue::JobQueue;
use crate::services::registry::{InstanceHandle, InstanceRegistry};
use crate::services::stats::StatsAggregator;

/// Upper bound on how long the loop sleeps with nothing scheduled.
const IDLE_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub max_processing_wait: Duration,
    pub max_attempts: u32,
    pub retry_reentry: RetryReentry,
}

impl From<&QueueSettings> for DispatchConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_processing_wait: settings.max_processing_wait,
            max_attempts: settings.max_attempts.max(1),
            retry_reentry: settings.retry_reentry,
        }
    }
}

struct InFlight {
    job: Job,
    instance: Arc<InstanceHandle>,
    task: JoinHandle<()>,
}

/// Matches queued jobs to online instances and owns every dispatched job.
///
/// This loop is the only writer of job status after admission and of
/// instance in-flight counters. Executors report back over a channel.
pub struct Dispatcher {
    queue: Arc<JobQueue>,
    registry: Arc<InstanceRegistry>,
    stats: Arc<StatsAggregator>,
    executor: JobExecutor,
    config: DispatchConfig,
    wake: Arc<Notify>,
    balancer: LeastLoaded,
    in_flight: HashMap<JobId, InFlight>,
    outcomes_tx: mpsc::UnboundedSender<Outcome>,
    outcomes_rx: mpsc::UnboundedReceiver<Outcome>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<InstanceRegistry>,
        stats: Arc<StatsAggregator>,
        executor: JobExecutor,
        config: DispatchConfig,
        wake: Arc<Notify>,
    ) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            queue,
            registry,
            stats,
            executor,
            config,
            wake,
            balancer: LeastLoaded::new(),
            in_flight: HashMap::new(),
            outcomes_tx,
            outcomes_rx,
        }
    }

    /// Starts the coordination loop.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(mut self, shutdown: CancellationToken) {
        self.stats.set_worker_running(true);
        tracing::info!(
            max_attempts = self.config.max_attempts,
            max_processing_wait_ms = self.config.max_processing_wait.as_millis() as u64,
            "Dispatcher started"
        );

        loop {
            self.pass().await;
            let wake_at = self.next_wake().await;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(outcome) = self.outcomes_rx.recv() => self.complete(outcome).await,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }

        self.abandon_in_flight();
        self.stats.set_worker_running(false);
        tracing::info!("Dispatcher stopped");
    }

    /// One coordination step: expire overdue jobs, then place what fits.
    pub(crate) async fn pass(&mut self) {
        let now = Instant::now();
        self.expire_in_flight(now).await;
        self.expire_queued(now).await;
        self.dispatch_available().await;
    }

    async fn next_wake(&self) -> Instant {
        let idle = Instant::now() + IDLE_TICK;
        let processing = self
            .in_flight
            .values()
            .filter_map(|f| f.job.processing_deadline)
            .min();
        let queued = self.queue.next_deadline().await;
        [Some(idle), processing, queued]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(idle)
    }

    async fn expire_in_flight(&mut self, now: Instant) {
        let overdue: Vec<JobId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.job.processing_deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();

        for id in overdue {
            let Some(InFlight {
                mut job,
                instance,
                task,
            }) = self.in_flight.remove(&id)
            else {
                continue;
            };
            task.abort();
            instance.release(false);

            job.status = JobStatus::TimedOut;
            job.error_kind = Some(ErrorKind::DeadlineExceeded);
            job.error = Some(format!(
                "instance {} did not answer within {}s",
                instance.name(),
                self.config.max_processing_wait.as_secs_f64()
            ));
            self.finish(job).await;
        }
    }

    async fn expire_queued(&mut self, now: Instant) {
        let expired = self.queue.take_expired(now).await;
        if expired.is_empty() {
            return;
        }

        let any_online = self.any_online().await;
        for mut job in expired {
            job.status = JobStatus::TimedOut;
            if any_online {
                job.error_kind = Some(ErrorKind::DeadlineExceeded);
                job.error = Some("waited too long in queue".to_string());
            } else {
                job.error_kind = Some(ErrorKind::InstanceUnavailable);
                job.error = Some("no OmniParser instance came online in time".to_string());
            }
            self.finish(job).await;
        }
    }

    async fn any_online(&self) -> bool {
        for instance in self.registry.all().await {
            if instance.status().await == InstanceStatus::Online {
                return true;
            }
        }
        false
    }

    async fn dispatch_available(&mut self) {
        let instances = self.registry.all().await;
        if instances.is_empty() {
            return;
        }

        loop {
            // Rebuilt per placement so a status change between jobs is honored.
            let mut candidates = Vec::with_capacity(instances.len());
            for instance in &instances {
                candidates.push(Candidate {
                    online: instance.status().await == InstanceStatus::Online,
                    in_flight: instance.in_flight(),
                    capacity: instance.capacity(),
                });
            }

            let Some(index) = self.balancer.select(&candidates) else {
                break;
            };
            let Some(job) = self.queue.pop_next().await else {
                break;
            };

            let instance = Arc::clone(&instances[index]);
            if !instance.try_acquire() {
                self.queue.restore(job).await;
                break;
            }
            self.launch(job, instance).await;
        }
    }

    async fn launch(&mut self, mut job: Job, instance: Arc<InstanceHandle>) {
        let now = Instant::now();
        job.status = JobStatus::Dispatched;
        job.attempt += 1;
        job.dispatched_at = Some(Utc::now());
        job.mark_dispatched(now);
        job.processing_deadline = Some(now + self.config.max_processing_wait);
        job.assigned_instance = Some(instance.name().to_string());
        self.stats.record_progress(job.record()).await;

        tracing::debug!(
            job_id = %job.id,
            instance = %instance.name(),
            attempt = job.attempt,
            queue_wait_ms = job.queue_wait_ms().unwrap_or_default(),
            "Job dispatched"
        );

        let request = ExecutionRequest {
            job_id: job.id,
            attempt: job.attempt,
            payload: Arc::clone(&job.payload),
            options: job.options.clone(),
        };
        let budget = self.config.max_processing_wait;
        let executor = self.executor.clone();
        let outcomes = self.outcomes_tx.clone();
        let target = Arc::clone(&instance);
        let task = tokio::spawn(async move {
            let outcome = executor.execute(request, &target, budget).await;
            let _ = outcomes.send(outcome);
        });

        self.in_flight.insert(
            job.id,
            InFlight {
                job,
                instance,
                task,
            },
        );
    }

    async fn complete(&mut self, outcome: Outcome) {
        let matches_attempt = self
            .in_flight
            .get(&outcome.job_id)
            .is_some_and(|f| f.job.attempt == outcome.attempt);
        if !matches_attempt {
            tracing::debug!(
                job_id = %outcome.job_id,
                instance = %outcome.instance,
                "Discarding outcome for a job no longer in flight"
            );
            return;
        }
        let Some(InFlight { mut job, instance, .. }) = self.in_flight.remove(&outcome.job_id)
        else {
            return;
        };
        // A failure that lands after the processing deadline is a timeout,
        // whichever timer fired first.
        let overdue = outcome.result.is_err()
            && job.processing_deadline.is_some_and(|d| d <= Instant::now());
        instance.release(!overdue);

        match outcome.result {
            Err(_) if overdue => {
                job.status = JobStatus::TimedOut;
                job.error_kind = Some(ErrorKind::DeadlineExceeded);
                job.error = Some(format!(
                    "instance {} did not answer within {}s",
                    instance.name(),
                    self.config.max_processing_wait.as_secs_f64()
                ));
                self.finish(job).await;
            }
            Ok(parsed) => {
                job.status = JobStatus::Succeeded;
                job.result = Some(parsed);
                job.error_kind = None;
                job.error = None;
                self.finish(job).await;
            }
            Err(e) if e.is_transient() && job.attempt < self.config.max_attempts => {
                tracing::info!(
                    job_id = %job.id,
                    instance = %outcome.instance,
                    attempt = job.attempt,
                    error = %e,
                    "Transient failure, requeueing job"
                );
                job.status = JobStatus::Queued;
                job.error_kind = Some(e.kind());
                job.error = Some(e.detail().to_string());
                job.processing_deadline = None;
                self.stats.record_retry(job.record()).await;
                self.queue.requeue(job, self.config.retry_reentry).await;
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error_kind = Some(e.kind());
                job.error = Some(e.detail().to_string());
                self.finish(job).await;
            }
        }
    }

    /// Move a job into a terminal state and notify its producer.
    async fn finish(&mut self, mut job: Job) {
        job.completed_at = Some(Utc::now());
        job.processing_deadline = None;
        let record = job.record();

        match record.status {
            JobStatus::Succeeded => tracing::info!(
                job_id = %record.job_id,
                instance = ?record.assigned_instance,
                attempt = record.attempt,
                processing_ms = record.processing_time.unwrap_or_default(),
                "Job succeeded"
            ),
            status => tracing::warn!(
                job_id = %record.job_id,
                status = %status,
                instance = ?record.assigned_instance,
                attempt = record.attempt,
                error_kind = ?record.error_kind,
                error = ?record.error,
                "Job did not succeed"
            ),
        }

        self.stats.record_terminal(record.clone()).await;
        if let Some(responder) = job.responder.take() {
            let _ = responder.send(record);
        }
    }

    fn abandon_in_flight(&mut self) {
        if !self.in_flight.is_empty() {
            tracing::warn!(jobs = self.in_flight.len(), "Abandoning in-flight jobs on shutdown");
        }
        for (_, InFlight { instance, task, .. }) in self.in_flight.drain() {
            task.abort();
            instance.release(false);
        }
    }
}

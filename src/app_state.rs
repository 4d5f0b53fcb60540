use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::QueueSettings;
use crate::models::instance::InstanceConfig;
use crate::models::stats::{HealthReport, QueueStats};
use crate::services::{
    dispatcher::{DispatchConfig, Dispatcher},
    executor::JobExecutor,
    health::{HealthCheckConfig, HealthMonitor},
    omniparser::OmniparserClient,
    queue::JobQueue,
    registry::{InstanceRegistry, RegistryError},
    sampler::DepthSampler,
    stats::StatsAggregator,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<InstanceRegistry>,
    pub stats: Arc<StatsAggregator>,
    pub settings: Arc<QueueSettings>,
    client: OmniparserClient,
    dispatcher_wake: Arc<Notify>,
    started: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        settings: QueueSettings,
        instances: Vec<InstanceConfig>,
    ) -> Result<Self, reqwest::Error> {
        let client = OmniparserClient::new()?;
        let dispatcher_wake = Arc::new(Notify::new());
        let stats = Arc::new(StatsAggregator::new(
            settings.job_history_size,
            settings.depth_history_size,
        ));
        let queue = Arc::new(JobQueue::new(
            settings.max_queue_size,
            settings.max_queue_wait,
            stats.clone(),
            dispatcher_wake.clone(),
        ));
        let registry = Arc::new(InstanceRegistry::new(
            instances,
            settings.per_instance_capacity,
        ));

        Ok(Self {
            queue,
            registry,
            stats,
            settings: Arc::new(settings),
            client,
            dispatcher_wake,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Spawn the health monitor, dispatcher and depth sampler.
    ///
    /// Only the first call starts anything; the dispatcher must stay the
    /// single writer of job state.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Background tasks already running");
            return Vec::new();
        }

        let monitor = HealthMonitor::new(
            self.registry.clone(),
            self.client.clone(),
            HealthCheckConfig::from(self.settings.as_ref()),
            self.dispatcher_wake.clone(),
        );
        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            self.registry.clone(),
            self.stats.clone(),
            JobExecutor::new(self.client.clone()),
            DispatchConfig::from(self.settings.as_ref()),
            self.dispatcher_wake.clone(),
        );
        let sampler = DepthSampler::new(
            self.queue.clone(),
            self.stats.clone(),
            self.settings.depth_sample_interval,
        );

        vec![
            monitor.spawn(shutdown.clone()),
            dispatcher.spawn(shutdown.clone()),
            sampler.spawn(shutdown),
        ]
    }

    pub async fn stats(&self) -> QueueStats {
        let queue_size = self.queue.len().await;
        self.stats.snapshot(queue_size).await
    }

    pub async fn health(&self) -> HealthReport {
        let instances = self.registry.snapshots().await;
        let queue_size = self.queue.len().await;
        self.stats.health(instances, queue_size)
    }

    /// Replace the instance set and let the dispatcher re-evaluate routing.
    pub async fn reconfigure(&self, instances: Vec<InstanceConfig>) -> Result<(), RegistryError> {
        self.registry.replace(instances).await?;
        self.dispatcher_wake.notify_one();
        Ok(())
    }
}

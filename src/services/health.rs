use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::QueueSettings;
use crate::models::instance::{FlapDamping, InstanceStatus, ProbeOutcome};
use crate::services::omniparser::OmniparserClient;
use crate::services::registry::{InstanceHandle, InstanceRegistry};

/// Probe cadence and damping thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub damping: FlapDamping,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(3),
            damping: FlapDamping::default(),
        }
    }
}

impl From<&QueueSettings> for HealthCheckConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            interval: settings.health_check_interval,
            timeout: settings.probe_timeout,
            damping: settings.damping,
        }
    }
}

/// Periodically probes every instance and drives its health state.
///
/// Probe failures never leave this component; they only change which
/// instances the dispatcher may route to.
pub struct HealthMonitor {
    registry: Arc<InstanceRegistry>,
    client: OmniparserClient,
    config: HealthCheckConfig,
    dispatcher_wake: Arc<Notify>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        client: OmniparserClient,
        config: HealthCheckConfig,
        dispatcher_wake: Arc<Notify>,
    ) -> Self {
        Self {
            registry,
            client,
            config,
            dispatcher_wake,
        }
    }

    /// Starts the probe loop.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => self.check_all().await,
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Probe every instance in parallel and apply the results.
    pub async fn check_all(&self) {
        let instances = self.registry.all().await;

        let checks = instances.into_iter().map(|instance| {
            let client = &self.client;
            let timeout = self.config.timeout;
            async move {
                let outcome = client.probe(instance.url(), timeout).await;
                (instance, outcome)
            }
        });
        let results = futures::future::join_all(checks).await;

        let mut changed = false;
        for (instance, outcome) in results {
            changed |= self.apply(&instance, &outcome).await;
        }

        if changed {
            self.dispatcher_wake.notify_one();
        }
    }

    async fn apply(&self, instance: &InstanceHandle, outcome: &ProbeOutcome) -> bool {
        let Some(status) = instance.apply_probe(outcome, self.config.damping).await else {
            return false;
        };

        metrics::gauge!("omniparser_instance_online", "instance" => instance.name().to_string())
            .set(if status == InstanceStatus::Online { 1.0 } else { 0.0 });

        match (status, outcome) {
            (InstanceStatus::Online, _) => {
                tracing::info!(instance = %instance.name(), url = %instance.url(), "Instance is online");
            }
            (_, ProbeOutcome::Unreachable(reason) | ProbeOutcome::ApplicationError(reason)) => {
                tracing::warn!(
                    instance = %instance.name(),
                    url = %instance.url(),
                    status = %status,
                    reason = %reason,
                    "Instance left rotation"
                );
            }
            _ => {}
        }
        true
    }
}

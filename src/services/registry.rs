use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::config::{validate_instances, ConfigError};
use crate::models::instance::{
    FlapDamping, InstanceConfig, InstanceHealth, InstanceSnapshot, InstanceStatus, ProbeOutcome,
};

/// One parsing instance with its live state.
///
/// Health fields are written only by the health monitor; the in-flight
/// counter only by the dispatcher. Each instance has its own lock.
#[derive(Debug)]
pub struct InstanceHandle {
    config: InstanceConfig,
    capacity: usize,
    health: RwLock<InstanceHealth>,
    in_flight: AtomicUsize,
    completed: AtomicU64,
}

impl InstanceHandle {
    pub fn new(config: InstanceConfig, default_capacity: usize) -> Self {
        let capacity = config.capacity.unwrap_or(default_capacity).max(1);
        Self {
            config,
            capacity,
            health: RwLock::new(InstanceHealth::default()),
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> InstanceStatus {
        self.health.read().await.status
    }

    /// Apply a probe result through the flap-damping state machine.
    pub async fn apply_probe(
        &self,
        outcome: &ProbeOutcome,
        damping: FlapDamping,
    ) -> Option<InstanceStatus> {
        self.health
            .write()
            .await
            .record_probe(outcome, damping, Utc::now())
    }

    /// Reserve a slot. Fails when the instance is already at capacity.
    pub(crate) fn try_acquire(&self) -> bool {
        let acquired = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if acquired {
            self.publish_in_flight();
        }
        acquired
    }

    pub(crate) fn release(&self, executed: bool) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if executed {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        self.publish_in_flight();
    }

    fn publish_in_flight(&self) {
        metrics::gauge!("omniparser_instance_in_flight", "instance" => self.config.name.clone())
            .set(self.in_flight() as f64);
    }

    pub async fn snapshot(&self) -> InstanceSnapshot {
        let health = self.health.read().await.clone();
        InstanceSnapshot {
            name: self.config.name.clone(),
            display_name: self.config.display_name().to_string(),
            url: self.config.url.clone(),
            status: health.status,
            consecutive_successes: health.consecutive_successes,
            consecutive_failures: health.consecutive_failures,
            in_flight: self.in_flight(),
            capacity: self.capacity,
            completed_jobs: self.completed_jobs(),
            last_checked: health.last_checked_at,
            last_error: health.last_error,
        }
    }
}

/// The configured set of parsing instances.
///
/// The outer lock guards only membership; it is written solely by
/// [`InstanceRegistry::replace`].
pub struct InstanceRegistry {
    instances: RwLock<Vec<Arc<InstanceHandle>>>,
    default_capacity: usize,
}

impl InstanceRegistry {
    pub fn new(configs: Vec<InstanceConfig>, default_capacity: usize) -> Self {
        let instances = configs
            .into_iter()
            .map(|c| Arc::new(InstanceHandle::new(c, default_capacity)))
            .collect();
        Self {
            instances: RwLock::new(instances),
            default_capacity,
        }
    }

    /// Current members in configuration order.
    pub async fn all(&self) -> Vec<Arc<InstanceHandle>> {
        self.instances.read().await.clone()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<InstanceHandle>> {
        self.instances
            .read()
            .await
            .iter()
            .find(|i| i.name() == name)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn snapshots(&self) -> Vec<InstanceSnapshot> {
        let instances = self.all().await;
        let mut snapshots = Vec::with_capacity(instances.len());
        for instance in instances {
            snapshots.push(instance.snapshot().await);
        }
        snapshots
    }

    /// Replace the member set.
    ///
    /// Members whose configuration is unchanged keep their handle, so their
    /// health state and in-flight count carry over. Removed members drop out
    /// of routing; jobs already running on them finish against the old handle.
    pub async fn replace(&self, configs: Vec<InstanceConfig>) -> Result<(), RegistryError> {
        validate_instances(&configs)?;

        let mut instances = self.instances.write().await;
        let next: Vec<Arc<InstanceHandle>> = configs
            .into_iter()
            .map(|config| {
                instances
                    .iter()
                    .find(|existing| existing.config == config)
                    .cloned()
                    .unwrap_or_else(|| Arc::new(InstanceHandle::new(config, self.default_capacity)))
            })
            .collect();

        tracing::info!(
            instances = next.len(),
            names = ?next.iter().map(|i| i.name()).collect::<Vec<_>>(),
            "Instance registry reconfigured"
        );
        *instances = next;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Config(#[from] ConfigError),
}

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::models::instance::{FlapDamping, InstanceConfig};
use crate::models::job::RetryReentry;

/// Upper bound on configured OmniParser instances.
pub const MAX_INSTANCES: usize = 5;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:9000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// JSON array of `{name, display_name, url, capacity}` or a comma-separated URL list.
    #[serde(default)]
    pub omniparser_servers: String,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_max_queue_wait_secs")]
    pub max_queue_wait_secs: u64,

    #[serde(default = "default_max_processing_wait_secs")]
    pub max_processing_wait_secs: u64,

    #[serde(default = "default_per_instance_capacity")]
    pub per_instance_capacity: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub retry_reentry: RetryReentry,

    #[serde(default = "default_depth_sample_interval_secs")]
    pub depth_sample_interval_secs: u64,

    #[serde(default = "default_depth_history_size")]
    pub depth_history_size: usize,

    #[serde(default = "default_job_history_size")]
    pub job_history_size: usize,

    /// Request body limit in bytes (base64 screenshots are large).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_max_queue_size() -> usize {
    50
}

fn default_health_check_interval_secs() -> u64 {
    5
}

fn default_probe_timeout_secs() -> u64 {
    3
}

fn default_success_threshold() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_max_queue_wait_secs() -> u64 {
    60
}

fn default_max_processing_wait_secs() -> u64 {
    30
}

fn default_per_instance_capacity() -> usize {
    1
}

fn default_max_attempts() -> u32 {
    2
}

fn default_depth_sample_interval_secs() -> u64 {
    2
}

fn default_depth_history_size() -> usize {
    500
}

fn default_job_history_size() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    25 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.queue_settings().validate()?;
        Ok(config)
    }

    /// Instances declared in `OMNIPARSER_SERVERS`.
    pub fn instances(&self) -> Result<Vec<InstanceConfig>, ConfigError> {
        parse_instances(&self.omniparser_servers)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_queue_size: self.max_queue_size,
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            damping: FlapDamping {
                success_threshold: self.success_threshold,
                failure_threshold: self.failure_threshold,
            },
            max_queue_wait: Duration::from_secs(self.max_queue_wait_secs),
            max_processing_wait: Duration::from_secs(self.max_processing_wait_secs),
            per_instance_capacity: self.per_instance_capacity,
            max_attempts: self.max_attempts,
            retry_reentry: self.retry_reentry,
            depth_sample_interval: Duration::from_secs(self.depth_sample_interval_secs),
            depth_history_size: self.depth_history_size,
            job_history_size: self.job_history_size,
        }
    }
}

/// Tunables consumed by the queue, dispatcher, health monitor and stats.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_queue_size: usize,
    pub health_check_interval: Duration,
    pub probe_timeout: Duration,
    pub damping: FlapDamping,
    pub max_queue_wait: Duration,
    pub max_processing_wait: Duration,
    pub per_instance_capacity: usize,
    pub max_attempts: u32,
    pub retry_reentry: RetryReentry,
    pub depth_sample_interval: Duration,
    pub depth_history_size: usize,
    pub job_history_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            health_check_interval: Duration::from_secs(default_health_check_interval_secs()),
            probe_timeout: Duration::from_secs(default_probe_timeout_secs()),
            damping: FlapDamping::default(),
            max_queue_wait: Duration::from_secs(default_max_queue_wait_secs()),
            max_processing_wait: Duration::from_secs(default_max_processing_wait_secs()),
            per_instance_capacity: default_per_instance_capacity(),
            max_attempts: default_max_attempts(),
            retry_reentry: RetryReentry::default(),
            depth_sample_interval: Duration::from_secs(default_depth_sample_interval_secs()),
            depth_history_size: default_depth_history_size(),
            job_history_size: default_job_history_size(),
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::Invalid("MAX_QUEUE_SIZE must be at least 1".into()));
        }
        if self.per_instance_capacity == 0 {
            return Err(ConfigError::Invalid("PER_INSTANCE_CAPACITY must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("MAX_ATTEMPTS must be at least 1".into()));
        }
        if self.damping.success_threshold == 0 || self.damping.failure_threshold == 0 {
            return Err(ConfigError::Invalid("health thresholds must be at least 1".into()));
        }
        if self.health_check_interval.is_zero() || self.depth_sample_interval.is_zero() {
            return Err(ConfigError::Invalid("intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse the instance list from either a JSON array or a comma-separated URL list.
pub fn parse_instances(raw: &str) -> Result<Vec<InstanceConfig>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let instances: Vec<InstanceConfig> = if raw.starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        raw.split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .enumerate()
            .map(|(i, url)| InstanceConfig {
                name: format!("omniparser-{}", i + 1),
                display_name: None,
                url: url.trim_end_matches('/').to_string(),
                capacity: None,
            })
            .collect()
    };

    validate_instances(&instances)?;
    Ok(instances)
}

/// Reject instance sets the registry cannot hold.
pub fn validate_instances(instances: &[InstanceConfig]) -> Result<(), ConfigError> {
    if instances.len() > MAX_INSTANCES {
        return Err(ConfigError::Invalid(format!(
            "at most {MAX_INSTANCES} OmniParser instances may be configured, got {}",
            instances.len()
        )));
    }

    let mut names = HashSet::new();
    for instance in instances {
        if instance.name.trim().is_empty() {
            return Err(ConfigError::Invalid("instance name must not be empty".into()));
        }
        if !names.insert(instance.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate instance name: {}",
                instance.name
            )));
        }
        if !(instance.url.starts_with("http://") || instance.url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "instance {} has a non-http url: {}",
                instance.name, instance.url
            )));
        }
        if instance.capacity == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "instance {} has zero capacity",
                instance.name
            )));
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid instance list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Externally visible health state of a parsing instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceStatus {
    Starting,
    Online,
    Offline,
    Error,
}

/// Static description of one OmniParser instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub url: String,
    /// Overrides the global per-instance capacity.
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl InstanceConfig {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Outcome of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    /// Connection refused, timeout, or a non-2xx status without an error body.
    Unreachable(String),
    /// The instance answered with a structured 5xx error.
    ApplicationError(String),
}

/// Thresholds used to damp flapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlapDamping {
    pub success_threshold: u32,
    pub failure_threshold: u32,
}

impl Default for FlapDamping {
    fn default() -> Self {
        Self {
            success_threshold: 1,
            failure_threshold: 2,
        }
    }
}

/// Mutable health fields of an instance. Written only by the health monitor.
#[derive(Debug, Clone)]
pub struct InstanceHealth {
    pub status: InstanceStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for InstanceHealth {
    fn default() -> Self {
        Self {
            status: InstanceStatus::Starting,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_checked_at: None,
            last_error: None,
        }
    }
}

impl InstanceHealth {
    /// Apply one probe result. Returns the new status when it changed.
    pub fn record_probe(
        &mut self,
        outcome: &ProbeOutcome,
        damping: FlapDamping,
        at: DateTime<Utc>,
    ) -> Option<InstanceStatus> {
        self.last_checked_at = Some(at);
        let previous = self.status;

        match outcome {
            ProbeOutcome::Reachable => {
                self.consecutive_failures = 0;
                self.last_error = None;
                if self.status == InstanceStatus::Online {
                    self.consecutive_successes = self.consecutive_successes.saturating_add(1);
                } else {
                    self.consecutive_successes += 1;
                    if self.consecutive_successes >= damping.success_threshold.max(1) {
                        self.status = InstanceStatus::Online;
                    }
                }
            }
            ProbeOutcome::Unreachable(reason) | ProbeOutcome::ApplicationError(reason) => {
                self.consecutive_successes = 0;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.last_error = Some(reason.clone());
                if self.consecutive_failures >= damping.failure_threshold.max(1) {
                    self.status = match outcome {
                        ProbeOutcome::ApplicationError(_) => InstanceStatus::Error,
                        _ => InstanceStatus::Offline,
                    };
                }
            }
        }

        (self.status != previous).then_some(self.status)
    }
}

/// Point-in-time view of an instance for readers.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceSnapshot {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub status: InstanceStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub in_flight: usize,
    pub capacity: usize,
    pub completed_jobs: u64,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

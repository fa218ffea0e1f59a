//! Configuration for monitoring and telemetry

use crate::error::{MonitoringError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete monitoring configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Background resource sampling
    pub sampling: SamplingConfig,
    /// Capacities of the bounded histories
    pub history: HistoryConfig,
    /// Health classification thresholds
    pub health: HealthConfig,
    /// Logging and metrics exporter
    pub telemetry: TelemetryConfig,
}

/// Background sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Run the sampling loop when the service starts
    pub enabled: bool,
    /// Seconds between two samples
    pub interval_secs: u64,
    /// Timeout for a single service probe in milliseconds
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub agent_metrics_capacity: usize,
    pub resource_capacity: usize,
    pub event_log_capacity: usize,
    /// Progress records kept per project
    pub progress_history_capacity: usize,
    /// Buffer of the in-process dashboard event channel
    pub event_channel_capacity: usize,
    /// File change events queued for the event pump before new ones are dropped
    pub file_event_queue_capacity: usize,
}

/// Health classification configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// An agent at or above this CPU percentage is unhealthy
    pub agent_cpu_threshold: f64,
    /// An agent at or above this memory (MB) is unhealthy
    pub agent_memory_threshold_mb: f64,
    /// An agent at or above this response time (ms) is unhealthy
    pub agent_response_time_threshold_ms: f64,
    /// Recommend action above this host CPU percentage
    pub recommend_cpu_percent: f64,
    /// Recommend action above this host memory percentage
    pub recommend_memory_percent: f64,
    /// Recommend action below this much free disk space
    pub recommend_min_free_disk_bytes: u64,
    /// How far back error events count as open issues
    pub issue_lookback_hours: i64,
}

/// Logging and metrics exporter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default log filter; `RUST_LOG` takes precedence
    pub log_level: String,
    /// Enable JSON logging format
    pub json_logs: bool,
    /// Prometheus listen address, e.g. `127.0.0.1:9090`
    pub prometheus_listen: Option<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            probe_timeout_ms: 5_000,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            agent_metrics_capacity: 1000,
            resource_capacity: 1000,
            event_log_capacity: 10_000,
            progress_history_capacity: 1000,
            event_channel_capacity: 1024,
            file_event_queue_capacity: 1024,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            agent_cpu_threshold: 90.0,
            agent_memory_threshold_mb: 2048.0,
            agent_response_time_threshold_ms: 2000.0,
            recommend_cpu_percent: 80.0,
            recommend_memory_percent: 85.0,
            recommend_min_free_disk_bytes: 10 * 1024 * 1024 * 1024,
            issue_lookback_hours: 24,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            prometheus_listen: None,
        }
    }
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl MonitoringConfig {
    /// Load from `config/default`, `config/local` and `AGENTDECK__*`
    /// environment variables, relative to the working directory
    pub fn load() -> Result<Self> {
        Self::load_from(".")
    }

    /// Load with the config directory resolved against `base`
    pub fn load_from(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let default_file = base.join("config").join("default");
        let local_file = base.join("config").join("local");

        let settings = config::Config::builder()
            .add_source(config::File::from(default_file).required(false))
            .add_source(config::File::from(local_file).required(false))
            .add_source(
                config::Environment::with_prefix("AGENTDECK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MonitoringConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sampling.interval_secs == 0 {
            return Err(MonitoringError::Config(
                "sampling.interval_secs must be greater than zero".to_string(),
            ));
        }
        let capacities = [
            ("history.agent_metrics_capacity", self.history.agent_metrics_capacity),
            ("history.resource_capacity", self.history.resource_capacity),
            ("history.event_log_capacity", self.history.event_log_capacity),
            ("history.progress_history_capacity", self.history.progress_history_capacity),
            ("history.event_channel_capacity", self.history.event_channel_capacity),
            ("history.file_event_queue_capacity", self.history.file_event_queue_capacity),
        ];
        for (key, value) in capacities {
            if value == 0 {
                return Err(MonitoringError::Config(format!(
                    "{} must be greater than zero",
                    key
                )));
            }
        }
        Ok(())
    }
}

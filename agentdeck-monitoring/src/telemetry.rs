//! Logging and metrics exporter setup

use crate::{config::TelemetryConfig, error::Result, MonitoringError};
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Process-wide logging and metrics bootstrap
pub struct TracingSetup {
    config: TelemetryConfig,
}

impl TracingSetup {
    pub fn new(config: TelemetryConfig) -> Self {
        Self { config }
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level. Fails if a global
    /// subscriber is already installed.
    pub fn initialize(&self) -> Result<()> {
        let env_filter = self.env_filter()?;
        let registry = Registry::default().with(env_filter);

        if self.config.json_logs {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false);

            registry.with(json_layer).try_init().map_err(|e| {
                MonitoringError::Telemetry(format!("Failed to init subscriber: {}", e))
            })?;
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false);

            registry.with(fmt_layer).try_init().map_err(|e| {
                MonitoringError::Telemetry(format!("Failed to init subscriber: {}", e))
            })?;
        }

        info!(json = self.config.json_logs, "Logging initialized");
        Ok(())
    }

    /// Install the Prometheus exporter when a listen address is configured.
    ///
    /// Returns whether an exporter was installed.
    pub fn install_metrics_exporter(&self) -> Result<bool> {
        let Some(listen) = &self.config.prometheus_listen else {
            info!("Prometheus exporter disabled");
            return Ok(false);
        };

        let addr = parse_listen_addr(listen)?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| {
                MonitoringError::Telemetry(format!("Failed to setup Prometheus: {}", e))
            })?;

        describe_metrics();
        info!(%addr, "Prometheus exporter listening");
        Ok(true)
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.config.log_level).map_err(|e| {
                MonitoringError::Telemetry(format!(
                    "Invalid log level '{}': {}",
                    self.config.log_level, e
                ))
            }),
        }
    }
}

fn parse_listen_addr(listen: &str) -> Result<SocketAddr> {
    listen
        .parse()
        .map_err(|e| MonitoringError::Config(format!("Invalid metrics address '{}': {}", listen, e)))
}

/// Register descriptions for every metric the workspace emits
pub fn describe_metrics() {
    metrics::describe_gauge!(
        "system_cpu_usage_percent",
        Unit::Percent,
        "Host CPU usage percentage"
    );
    metrics::describe_gauge!(
        "system_memory_used_bytes",
        Unit::Bytes,
        "Host memory in use"
    );
    metrics::describe_gauge!(
        "system_memory_usage_percent",
        Unit::Percent,
        "Host memory usage percentage"
    );
    metrics::describe_gauge!(
        "system_disk_available_bytes",
        Unit::Bytes,
        "Free disk space across mounted disks"
    );
    metrics::describe_gauge!("system_load_average", "One minute load average");
    metrics::describe_gauge!("system_process_count", "Number of running processes");
    metrics::describe_gauge!("registry_agents", "Agents currently registered");
    metrics::describe_counter!("agent_tasks_total", "Unit-of-work executions by outcome");
    metrics::describe_counter!("bus_deliveries_total", "Message deliveries by outcome");
    metrics::describe_counter!("dashboard_events_total", "Dashboard events emitted by name");
    metrics::describe_counter!("system_events_total", "System events recorded by severity");
    metrics::describe_counter!("file_events_dropped_total", "File changes dropped on a full queue");
}

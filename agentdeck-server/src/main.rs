//! Agentdeck server binary
//!
//! Loads configuration, initialises logging and the optional Prometheus
//! exporter, then runs the control plane until Ctrl-C.

use agentdeck_server::{config::Config, server::Server, Result};
use agentdeck_monitoring::TracingSetup;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

/// Agentdeck control plane and dashboard feed
#[derive(Parser)]
#[command(name = "agentdeck")]
#[command(about = "Agent control plane streaming a real-time progress dashboard feed")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Additional directory to watch for file changes (repeatable)
    #[arg(long = "watch")]
    watch: Vec<PathBuf>,

    /// Override the log level filter
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Serve Prometheus metrics on this address, e.g. 127.0.0.1:9000
    #[arg(long)]
    metrics_listen: Option<String>,

    /// Do not write dashboard events to stdout
    #[arg(long)]
    no_stream: bool,

    /// Disable background resource sampling
    #[arg(long)]
    no_sampling: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    apply_cli_overrides(&mut config, &cli);

    let telemetry = TracingSetup::new(config.monitoring.telemetry.clone());
    telemetry.initialize()?;
    telemetry.install_metrics_exporter()?;

    info!(
        watch_paths = config.server.watch_paths.len(),
        sampling = config.monitoring.sampling.enabled,
        "Configuration loaded"
    );

    let server = Server::new(config)?;
    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Apply CLI argument overrides to configuration
fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    config.server.watch_paths.extend(cli.watch.iter().cloned());

    if let Some(level) = &cli.log_level {
        config.monitoring.telemetry.log_level = level.clone();
    }
    if cli.json_logs {
        config.monitoring.telemetry.json_logs = true;
    }
    if let Some(addr) = &cli.metrics_listen {
        config.monitoring.telemetry.prometheus_listen = Some(addr.clone());
    }
    if cli.no_stream {
        config.server.stream_events = false;
    }
    if cli.no_sampling {
        config.monitoring.sampling.enabled = false;
    }
}

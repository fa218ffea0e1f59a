//! Configuration management for the server

use crate::{Error, Result};
use agentdeck_core::BusConfig;
use agentdeck_monitoring::MonitoringConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub monitoring: MonitoringConfig,
}

/// Process-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Directories watched for file changes
    pub watch_paths: Vec<PathBuf>,
    /// Write every dashboard event to stdout as a JSON line
    pub stream_events: bool,
    /// Seconds to wait for agents and background tasks on shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            watch_paths: Vec::new(),
            stream_events: true,
            shutdown_timeout_secs: 10,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("AGENTDECK")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Config {
    /// Load configuration from `config/default`, `config/local` and
    /// `AGENTDECK__*` environment variables
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file, still honouring environment overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.monitoring.validate()?;
        if self.bus.delivery_timeout.is_zero() {
            return Err(Error::Configuration(
                "bus.delivery_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.server.stream_events);
        assert_eq!(config.bus.delivery_timeout, Duration::from_secs(30));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentdeck.toml");
        std::fs::write(
            &path,
            r#"
[server]
watch_paths = ["/srv/projects"]
stream_events = false

[bus]
delivery_timeout = 1500

[monitoring.sampling]
interval_secs = 2
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.server.watch_paths, vec![PathBuf::from("/srv/projects")]);
        assert!(!config.server.stream_events);
        assert_eq!(config.bus.delivery_timeout, Duration::from_millis(1500));
        assert_eq!(config.monitoring.sampling.interval_secs, 2);
        assert_eq!(config.monitoring.history, Default::default());
    }

    #[test]
    fn test_missing_file_is_a_configuration_error() {
        let err = Config::load_from_file("/nonexistent/agentdeck.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentdeck.toml");
        std::fs::write(&path, "[monitoring.sampling]\ninterval_secs = 0\n").unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Monitoring(_)));
    }
}

//! Error types for monitoring and aggregation

use thiserror::Error;

/// Result type for monitoring operations
pub type Result<T> = std::result::Result<T, MonitoringError>;

/// Monitoring error types
#[derive(Error, Debug)]
pub enum MonitoringError {
    /// Bad argument at the service boundary
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: String },

    /// Operation exists but is not implemented
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Resource sampling failed
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// File watch registration failed
    #[error("File watch error: {0}")]
    Watch(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging or metrics exporter setup error
    #[error("Telemetry setup error: {0}")]
    Telemetry(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] agentdeck_core::Error),

    /// Anyhow error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<notify::Error> for MonitoringError {
    fn from(err: notify::Error) -> Self {
        MonitoringError::Watch(err.to_string())
    }
}

impl From<config::ConfigError> for MonitoringError {
    fn from(err: config::ConfigError) -> Self {
        MonitoringError::Config(err.to_string())
    }
}

impl MonitoringError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found<S1: Into<String>, S2: Into<String>>(entity_type: S1, id: S2) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::Unsupported(operation.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MonitoringError::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, MonitoringError::Validation(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, MonitoringError::Unsupported(_))
    }
}

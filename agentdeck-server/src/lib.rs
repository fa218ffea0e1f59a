//! Agentdeck server
//!
//! Wires the agent registry, the message bus and the monitoring service into
//! one process and streams the dashboard feed to stdout.

pub mod bridge;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

/// Re-export the library crates for convenience
pub use agentdeck_core as control;
pub use agentdeck_monitoring as monitoring;

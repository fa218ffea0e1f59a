//! Agentdeck core control plane
//!
//! This crate provides the pieces that govern generation agents:
//!
//! - **Agent lifecycle**: a state machine around an injected [`UnitOfWork`],
//!   with cooperative cancellation and execution metrics
//! - **Agent registry**: a concurrent catalog with lookups and health snapshots
//! - **Message bus**: broadcast and targeted delivery with per-subscriber
//!   failure isolation
//!
//! # Example
//!
//! ```rust
//! use agentdeck_core::{AgentMessage, AgentRegistry, MessageBus};
//! use uuid::Uuid;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let registry = AgentRegistry::new();
//! let bus = MessageBus::new();
//! assert!(registry.is_empty());
//!
//! let result = bus.publish(AgentMessage::broadcast(Uuid::new_v4(), "hello").unwrap()).await;
//! assert!(!result.delivered);
//! # });
//! ```

pub mod agent;
pub mod bus;
pub mod error;
pub mod message;
pub mod registry;

pub use agent::{
    Agent, AgentBuilder, AgentId, AgentMetrics, AgentSnapshot, AgentStatus, TaskResult,
    UnitOfWork,
};
pub use bus::{BusConfig, FnHandler, MessageBus, MessageHandler};
pub use error::{Error, Result};
pub use message::{AgentMessage, AgentMessageBuilder, MessagePayload, MessageResult, MessageType};
pub use registry::{AgentHealth, AgentRegistry};

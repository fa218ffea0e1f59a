//! Publish/subscribe bus between agents
//!
//! Broadcasts reach every subscriber except the sender; targeted messages
//! reach exactly one handler. Each delivery is isolated: an error, panic or
//! timeout in one handler is logged and never affects sibling deliveries or
//! the publish call itself.

use crate::{
    agent::AgentId,
    message::{AgentMessage, MessageResult},
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Receives messages delivered to a subscriber
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &AgentMessage) -> anyhow::Result<()>;
}

/// Adapts an async closure into a [`MessageHandler`]
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(AgentMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: &AgentMessage) -> anyhow::Result<()> {
        (self.f)(message.clone()).await
    }
}

/// Bus configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    /// Upper bound for a single handler invocation
    #[serde(with = "duration_millis")]
    pub delivery_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

/// In-process message bus keyed by subscriber id
pub struct MessageBus {
    subscribers: DashMap<AgentId, Arc<dyn MessageHandler>>,
    config: BusConfig,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            subscribers: DashMap::new(),
            config,
        }
    }

    /// Register `handler` for `id`, replacing any previous handler
    pub fn subscribe(&self, id: AgentId, handler: Arc<dyn MessageHandler>) {
        if self.subscribers.insert(id, handler).is_some() {
            debug!(subscriber = %id, "Replaced existing bus handler");
        } else {
            debug!(subscriber = %id, "Subscribed to bus");
        }
    }

    /// Remove the handler for `id` if present
    pub fn unsubscribe(&self, id: AgentId) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = %id, "Unsubscribed from bus");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_subscribed(&self, id: AgentId) -> bool {
        self.subscribers.contains_key(&id)
    }

    pub async fn publish(&self, message: AgentMessage) -> MessageResult {
        match message.receiver_id {
            Some(receiver) if !message.is_broadcast() => {
                self.deliver_targeted(receiver, &message).await
            }
            _ => self.deliver_broadcast(&message).await,
        }
    }

    async fn deliver_broadcast(&self, message: &AgentMessage) -> MessageResult {
        // snapshot so no map guard is held across an await
        let recipients: Vec<(AgentId, Arc<dyn MessageHandler>)> = self
            .subscribers
            .iter()
            .filter(|entry| *entry.key() != message.sender_id)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        if recipients.is_empty() {
            debug!(message_id = %message.id, "Broadcast has no subscribers");
            return MessageResult::failed("No subscribers found for broadcast");
        }

        let deliveries = recipients
            .iter()
            .map(|(id, handler)| self.deliver(*id, handler.clone(), message));
        let outcomes = futures::future::join_all(deliveries).await;

        let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        debug!(
            message_id = %message.id,
            recipients = recipients.len(),
            succeeded,
            "Broadcast delivered"
        );
        MessageResult::delivered(succeeded)
    }

    async fn deliver_targeted(&self, receiver: AgentId, message: &AgentMessage) -> MessageResult {
        let handler = match self.subscribers.get(&receiver) {
            Some(entry) => entry.value().clone(),
            None => {
                warn!(message_id = %message.id, receiver = %receiver, "Recipient not found");
                return MessageResult::failed("Recipient not found");
            }
        };

        match self.deliver(receiver, handler, message).await {
            Ok(()) => MessageResult::delivered(1),
            Err(e) => MessageResult {
                delivered: true,
                error: Some(e),
                delivered_at: Some(chrono::Utc::now()),
                recipients: 0,
            },
        }
    }

    /// Invoke one handler, containing errors, panics and timeouts
    async fn deliver(
        &self,
        subscriber: AgentId,
        handler: Arc<dyn MessageHandler>,
        message: &AgentMessage,
    ) -> std::result::Result<(), String> {
        let call = AssertUnwindSafe(handler.handle(message)).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.delivery_timeout, call).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(format!("Handler error: {}", e)),
            Ok(Err(_)) => Err("Handler panicked".to_string()),
            Err(_) => Err(format!(
                "Handler timed out after {}ms",
                self.config.delivery_timeout.as_millis()
            )),
        };

        match &outcome {
            Ok(()) => {
                metrics::counter!("bus_deliveries_total", "outcome" => "ok").increment(1);
            }
            Err(reason) => {
                metrics::counter!("bus_deliveries_total", "outcome" => "failed").increment(1);
                error!(
                    message_id = %message.id,
                    subscriber = %subscriber,
                    error = %reason,
                    "Message delivery failed"
                );
            }
        }
        outcome
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Realtime sink abstraction
//!
//! The monitoring service pushes every [`DashboardEvent`] onto a sink under a
//! channel name. The transport behind the sink (websocket, SSE, a queue) is
//! not this crate's concern.

use crate::events::{ChannelEvent, DashboardEvent};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

/// Publish side of the realtime transport
#[async_trait]
pub trait RealtimeSink: Send + Sync {
    async fn publish(&self, channel: &str, event: &DashboardEvent) -> anyhow::Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl RealtimeSink for NullSink {
    async fn publish(&self, _channel: &str, _event: &DashboardEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Sink backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ChannelEvent>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(512)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new receiver for a transport connection
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl RealtimeSink for BroadcastSink {
    async fn publish(&self, channel: &str, event: &DashboardEvent) -> anyhow::Result<()> {
        // no connected receivers is not an error
        if let Err(e) = self.sender.send(ChannelEvent::new(channel, event.clone())) {
            debug!(channel, "Realtime broadcast has no receivers: {}", e);
        }
        Ok(())
    }
}

//! Bus subscriber feeding agent reports into the monitoring service

use agentdeck_core::{AgentMessage, MessageHandler, MessagePayload, MessageType};
use agentdeck_monitoring::{EventSeverity, MonitoringService};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Translates progress payloads and notifications published on the bus
/// into monitoring updates
pub struct MonitoringBridge {
    monitoring: Arc<MonitoringService>,
}

impl MonitoringBridge {
    pub fn new(monitoring: Arc<MonitoringService>) -> Self {
        Self { monitoring }
    }
}

#[async_trait]
impl MessageHandler for MonitoringBridge {
    async fn handle(&self, message: &AgentMessage) -> anyhow::Result<()> {
        match &message.payload {
            MessagePayload::Progress {
                project_id,
                document_type,
                progress,
                status,
            } => {
                self.monitoring
                    .update_progress(project_id, document_type, *progress, status)
                    .await?;
            }
            _ if message.message_type == MessageType::Notification => {
                self.monitoring
                    .record_system_event(
                        "agent_notification",
                        &message.sender_id.to_string(),
                        &message.content,
                        EventSeverity::Info,
                        None,
                    )
                    .await?;
            }
            _ => {
                debug!(message_id = %message.id, "Ignoring message without monitoring data");
            }
        }
        Ok(())
    }
}

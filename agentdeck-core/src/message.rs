//! Message model for agent-to-agent communication

use crate::{agent::AgentId, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of message travelling over the bus
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    Request,
    Response,
    Broadcast,
    Notification,
    Command,
    Event,
}

/// Typed message payload
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    /// No structured payload; `content` carries the message
    #[default]
    None,
    Text {
        text: String,
    },
    /// Hand a task to another agent
    Task {
        task_id: Uuid,
        description: String,
        #[serde(default)]
        parameters: serde_json::Value,
    },
    Progress {
        project_id: String,
        document_type: String,
        progress: f64,
        status: String,
    },
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Escape hatch for payloads without a schema yet
    Json {
        value: serde_json::Value,
    },
}

/// A message published on the bus. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub id: Uuid,
    pub sender_id: AgentId,
    pub receiver_id: Option<AgentId>,
    pub message_type: MessageType,
    pub content: String,
    pub payload: MessagePayload,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

impl AgentMessage {
    /// Create a builder for constructing an AgentMessage
    pub fn builder() -> AgentMessageBuilder {
        AgentMessageBuilder::new()
    }

    /// Broadcast plain text to every other subscriber
    pub fn broadcast<S: Into<String>>(sender_id: AgentId, content: S) -> Result<Self> {
        Self::builder()
            .sender(sender_id)
            .message_type(MessageType::Broadcast)
            .content(content)
            .build()
    }

    /// Send a request to a single recipient
    pub fn request<S: Into<String>>(
        sender_id: AgentId,
        receiver_id: AgentId,
        content: S,
    ) -> Result<Self> {
        Self::builder()
            .sender(sender_id)
            .receiver(receiver_id)
            .message_type(MessageType::Request)
            .content(content)
            .build()
    }

    /// Whether the bus fans this message out to every subscriber
    pub fn is_broadcast(&self) -> bool {
        self.message_type == MessageType::Broadcast || self.receiver_id.is_none()
    }

    /// Build a `Response` addressed back to the sender of this message.
    ///
    /// The response is correlated with this message's correlation id, or with
    /// its id when it had none.
    pub fn reply_to<S: Into<String>>(&self, responder: AgentId, content: S) -> Result<Self> {
        Self::builder()
            .sender(responder)
            .receiver(self.sender_id)
            .message_type(MessageType::Response)
            .content(content)
            .correlation_id(self.correlation_id.unwrap_or(self.id))
            .build()
    }
}

/// Builder for constructing AgentMessage instances with validation
#[derive(Debug, Default)]
pub struct AgentMessageBuilder {
    sender_id: Option<AgentId>,
    receiver_id: Option<AgentId>,
    message_type: Option<MessageType>,
    content: Option<String>,
    payload: MessagePayload,
    correlation_id: Option<Uuid>,
}

impl AgentMessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender_id: AgentId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    pub fn receiver(mut self, receiver_id: AgentId) -> Self {
        self.receiver_id = Some(receiver_id);
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn payload(mut self, payload: MessagePayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn build(self) -> Result<AgentMessage> {
        let sender_id = self
            .sender_id
            .ok_or_else(|| Error::validation("Message sender is required"))?;
        let content = self.content.unwrap_or_default();
        if content.trim().is_empty() && self.payload == MessagePayload::None {
            return Err(Error::validation(
                "Message must carry content or a payload",
            ));
        }

        let message_type = self.message_type.unwrap_or(if self.receiver_id.is_some() {
            MessageType::Request
        } else {
            MessageType::Broadcast
        });

        Ok(AgentMessage {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id: self.receiver_id,
            message_type,
            content,
            payload: self.payload,
            timestamp: Utc::now(),
            correlation_id: self.correlation_id,
        })
    }
}

/// Outcome of a publish, returned to the publisher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageResult {
    pub delivered: bool,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Number of handlers that accepted the message
    pub recipients: usize,
}

impl MessageResult {
    pub fn delivered(recipients: usize) -> Self {
        Self {
            delivered: true,
            error: None,
            delivered_at: Some(Utc::now()),
            recipients,
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            delivered: false,
            error: Some(error.into()),
            delivered_at: None,
            recipients: 0,
        }
    }
}

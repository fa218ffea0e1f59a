//! Dashboard events and the system event log model

use crate::{
    agents::{AgentHealthReport, AgentStatusView},
    metrics::SystemMetrics,
    progress::{DocumentCompletion, ProgressNotification, ProjectProgressNotification},
    watcher::FileChangeEvent,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel every dashboard client listens on
pub const DASHBOARD_CHANNEL: &str = "dashboard";

/// Per-project channel name
pub fn project_channel(project_id: &str) -> String {
    format!("project-{}", project_id)
}

/// Severity of a system event, ordered from least to most severe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Debug => write!(f, "debug"),
            EventSeverity::Info => write!(f, "info"),
            EventSeverity::Warning => write!(f, "warning"),
            EventSeverity::Error => write!(f, "error"),
            EventSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// An entry of the bounded system event log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemEvent {
    pub event_type: String,
    pub source: String,
    pub message: String,
    pub severity: EventSeverity,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SystemEvent {
    pub fn new<S1, S2, S3>(
        event_type: S1,
        source: S2,
        message: S3,
        severity: EventSeverity,
        timestamp: DateTime<Utc>,
    ) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            message: message.into(),
            severity,
            data: serde_json::Value::Null,
            timestamp,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Query over the system event log
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Keep events at or above this severity
    pub min_severity: Option<EventSeverity>,
    pub source: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &SystemEvent) -> bool {
        self.min_severity.map_or(true, |min| event.severity >= min)
            && self.source.as_deref().map_or(true, |s| event.source == s)
            && self
                .event_type
                .as_deref()
                .map_or(true, |t| event.event_type == t)
            && self.since.map_or(true, |since| event.timestamp >= since)
    }
}

/// Structured notification pushed to realtime subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardEvent {
    DocumentProgress(ProgressNotification),
    DocumentCompleted(DocumentCompletion),
    ProjectProgress(ProjectProgressNotification),
    AgentStatus(AgentStatusView),
    AgentHealth(AgentHealthReport),
    SystemMetrics(SystemMetrics),
    SystemEvent(SystemEvent),
    FileChanged(FileChangeEvent),
}

impl DashboardEvent {
    /// Event name used by the realtime transport
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::DocumentProgress(_) => "document_progress",
            DashboardEvent::DocumentCompleted(_) => "document_completed",
            DashboardEvent::ProjectProgress(_) => "project_progress",
            DashboardEvent::AgentStatus(_) => "agent_status",
            DashboardEvent::AgentHealth(_) => "agent_health",
            DashboardEvent::SystemMetrics(_) => "system_metrics",
            DashboardEvent::SystemEvent(_) => "system_event",
            DashboardEvent::FileChanged(_) => "file_changed",
        }
    }

    /// Project the event belongs to, if any
    pub fn project_id(&self) -> Option<&str> {
        match self {
            DashboardEvent::DocumentProgress(n) => Some(&n.project_id),
            DashboardEvent::DocumentCompleted(c) => Some(&c.project_id),
            DashboardEvent::ProjectProgress(n) => Some(&n.project_id),
            DashboardEvent::AgentStatus(view) => Some(&view.project_id),
            _ => None,
        }
    }
}

/// A dashboard event together with the channel it was published on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub name: String,
    pub event: DashboardEvent,
}

impl ChannelEvent {
    pub fn new(channel: &str, event: DashboardEvent) -> Self {
        Self {
            channel: channel.to_string(),
            name: event.name().to_string(),
            event,
        }
    }
}

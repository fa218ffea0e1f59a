//! Monitoring view of agents: status, metrics samples and health

use crate::config::HealthConfig;
use agentdeck_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse state of an agent as seen by the dashboard
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentState {
    Starting,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl AgentState {
    /// Whether the agent still counts towards a project's active agents
    pub fn is_active(&self) -> bool {
        matches!(self, AgentState::Starting | AgentState::Running)
    }
}

/// Dashboard-facing status of a monitored agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentStatusView {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub project_id: String,
    pub state: AgentState,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

impl AgentStatusView {
    pub fn new(agent_id: AgentId, agent_type: &str, project_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            agent_type: agent_type.to_string(),
            project_id: project_id.to_string(),
            state: AgentState::Starting,
            started_at: now,
            last_heartbeat: now,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
        }
    }
}

/// Metrics reported by or about an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentMetricsSample {
    /// CPU usage percentage
    pub cpu_usage: f64,
    /// Memory usage in MB
    pub memory_usage: f64,
    /// Response time of the latest request in milliseconds
    pub response_time_ms: f64,
    pub requests_per_minute: f64,
    #[serde(default)]
    pub custom_metrics: BTreeMap<String, f64>,
}

/// A sample stored in an agent's metrics history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMetricsRecord {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub timestamp: DateTime<Utc>,
    pub sample: AgentMetricsSample,
}

/// Health verdict derived from an agent's latest metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentHealthReport {
    pub agent_id: AgentId,
    pub agent_type: String,
    pub is_healthy: bool,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub requests_per_minute: f64,
    pub average_response_time: f64,
    pub custom_metrics: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
}

/// Limits above which an agent is considered unhealthy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub response_time_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_mb: 2048.0,
            response_time_ms: 2000.0,
        }
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            cpu_percent: config.agent_cpu_threshold,
            memory_mb: config.agent_memory_threshold_mb,
            response_time_ms: config.agent_response_time_threshold_ms,
        }
    }
}

impl HealthThresholds {
    /// Healthy only when every value is strictly below its limit
    pub fn is_healthy(&self, sample: &AgentMetricsSample) -> bool {
        sample.cpu_usage < self.cpu_percent
            && sample.memory_usage < self.memory_mb
            && sample.response_time_ms < self.response_time_ms
    }

    pub fn classify(&self, record: &AgentMetricsRecord) -> AgentHealthReport {
        let sample = &record.sample;
        AgentHealthReport {
            agent_id: record.agent_id,
            agent_type: record.agent_type.clone(),
            is_healthy: self.is_healthy(sample),
            cpu_usage: sample.cpu_usage,
            memory_usage: sample.memory_usage,
            requests_per_minute: sample.requests_per_minute,
            average_response_time: sample.response_time_ms,
            custom_metrics: sample.custom_metrics.clone(),
            last_updated: record.timestamp,
        }
    }
}

//! Concurrent catalog of agents

use crate::{
    agent::{Agent, AgentId, AgentMetrics, AgentStatus, UnitOfWork},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Health snapshot derived from an agent's lifecycle state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentHealth {
    pub agent_id: AgentId,
    pub name: String,
    pub status: AgentStatus,
    pub is_healthy: bool,
    pub message: String,
    pub metrics: AgentMetrics,
    pub checked_at: DateTime<Utc>,
}

impl AgentHealth {
    fn from_agent(agent: &Agent) -> Self {
        let status = agent.status();
        let message = match status {
            AgentStatus::Running => "Agent is running normally".to_string(),
            AgentStatus::Failed => format!(
                "Agent failed: {}",
                agent.last_error().unwrap_or_else(|| "unknown error".to_string())
            ),
            AgentStatus::Stopped => "Agent is stopped".to_string(),
            AgentStatus::Idle => "Agent is idle".to_string(),
            other => format!("Agent status: {}", other),
        };

        Self {
            agent_id: agent.id(),
            name: agent.name().to_string(),
            status,
            is_healthy: matches!(status, AgentStatus::Running | AgentStatus::Idle),
            message,
            metrics: agent.metrics(),
            checked_at: Utc::now(),
        }
    }
}

/// Thread-safe registry of agents keyed by id
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Register an agent. Fails if an agent with the same id is present.
    pub fn register(&self, agent: Arc<Agent>) -> Result<()> {
        match self.agents.entry(agent.id()) {
            Entry::Occupied(_) => {
                warn!(agent_id = %agent.id(), "Agent is already registered");
                Err(Error::already_exists("Agent", agent.id().to_string()))
            }
            Entry::Vacant(slot) => {
                info!(agent_id = %agent.id(), name = %agent.name(), kind = %agent.kind(), "Agent registered");
                slot.insert(agent);
                metrics::gauge!("registry_agents").increment(1.0);
                Ok(())
            }
        }
    }

    /// Remove an agent; absent ids are logged and ignored
    pub fn unregister(&self, id: AgentId) -> Option<Arc<Agent>> {
        match self.agents.remove(&id) {
            Some((_, agent)) => {
                info!(agent_id = %id, name = %agent.name(), "Agent unregistered");
                metrics::gauge!("registry_agents").decrement(1.0);
                Some(agent)
            }
            None => {
                warn!(agent_id = %id, "Attempted to unregister unknown agent");
                None
            }
        }
    }

    pub fn get_by_id(&self, id: AgentId) -> Option<Arc<Agent>> {
        self.agents.get(&id).map(|entry| entry.value().clone())
    }

    /// First agent whose name matches, ignoring case
    pub fn get_by_name(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents
            .iter()
            .find(|entry| entry.value().name().eq_ignore_ascii_case(name))
            .map(|entry| entry.value().clone())
    }

    pub fn get_all(&self) -> Vec<Arc<Agent>> {
        self.agents.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Agents whose unit of work is of type `W`
    pub fn get_by_type<W: UnitOfWork>(&self) -> Vec<Arc<Agent>> {
        self.filter(|agent| agent.is_kind_of::<W>())
    }

    /// Agents whose unit-of-work type name matches `kind`, ignoring case
    pub fn get_by_kind(&self, kind: &str) -> Vec<Arc<Agent>> {
        self.filter(|agent| agent.kind().eq_ignore_ascii_case(kind))
    }

    pub fn get_running(&self) -> Vec<Arc<Agent>> {
        self.filter(|agent| agent.status() == AgentStatus::Running)
    }

    pub fn get_health(&self, id: AgentId) -> Result<AgentHealth> {
        self.agents
            .get(&id)
            .map(|entry| AgentHealth::from_agent(entry.value()))
            .ok_or_else(|| Error::not_found("Agent", id.to_string()))
    }

    pub fn get_all_health(&self) -> Vec<AgentHealth> {
        self.agents
            .iter()
            .map(|entry| AgentHealth::from_agent(entry.value()))
            .collect()
    }

    /// Current status, or `None` when the id is not registered
    pub fn status(&self, id: AgentId) -> Option<AgentStatus> {
        self.agents.get(&id).map(|entry| entry.value().status())
    }

    /// Legacy status lookup that reports unknown ids as `Failed`.
    ///
    /// Callers cannot tell an absent agent from a failed one; prefer
    /// [`AgentRegistry::status`].
    pub fn status_or_failed(&self, id: AgentId) -> AgentStatus {
        self.status(id).unwrap_or(AgentStatus::Failed)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// Stop every running agent. Returns how many stopped cleanly.
    pub async fn stop_all(&self) -> usize {
        let running = self.get_running();
        debug!(count = running.len(), "Stopping all running agents");

        let results = futures::future::join_all(running.iter().map(|agent| agent.stop())).await;

        let mut stopped = 0;
        for (agent, result) in running.iter().zip(results) {
            match result {
                Ok(()) => stopped += 1,
                Err(e) => {
                    error!(agent_id = %agent.id(), name = %agent.name(), error = %e, "Failed to stop agent")
                }
            }
        }
        stopped
    }

    fn filter<F>(&self, predicate: F) -> Vec<Arc<Agent>>
    where
        F: Fn(&Agent) -> bool,
    {
        self.agents
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

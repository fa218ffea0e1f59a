//! Project catalog entries, overviews and phase inference

use agentdeck_core::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse stage of a project's pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProjectPhase {
    Initialization,
    RequirementsGathering,
    DocumentGeneration,
    CodeGeneration,
    Testing,
    Completed,
}

/// Descriptive data about a project, supplied by its owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectInfo {
    pub project_id: String,
    pub name: String,
    pub project_type: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectInfo {
    pub fn new<S1, S2, S3>(project_id: S1, name: S2, project_type: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            project_type: project_type.into(),
            created_at: Utc::now(),
        }
    }
}

/// Dashboard summary of one project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectOverview {
    pub project_id: String,
    pub project_name: String,
    pub project_type: String,
    pub created_at: DateTime<Utc>,
    pub document_progress: BTreeMap<String, f64>,
    pub overall_progress: f64,
    pub has_errors: bool,
    pub active_agents: Vec<AgentId>,
    pub current_phase: ProjectPhase,
}

/// Infer the phase of a project. Rules are evaluated top-down and the first
/// match wins.
pub fn determine_project_phase(
    overall_progress: f64,
    document_progress: &BTreeMap<String, f64>,
    active_agents: usize,
) -> ProjectPhase {
    if overall_progress <= 0.0 {
        return ProjectPhase::Initialization;
    }
    if document_progress.is_empty() {
        return ProjectPhase::RequirementsGathering;
    }

    let mean = document_progress.values().sum::<f64>() / document_progress.len() as f64;
    if mean < 100.0 {
        ProjectPhase::DocumentGeneration
    } else if active_agents > 0 {
        ProjectPhase::CodeGeneration
    } else if overall_progress < 100.0 {
        ProjectPhase::Testing
    } else {
        ProjectPhase::Completed
    }
}

//! Per-project document generation progress

use crate::error::{MonitoringError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const STATUS_STARTING: &str = "Starting";
pub const STATUS_COMPLETED: &str = "Completed";
pub const STATUS_FAILED: &str = "Failed";

/// Milestones kept per document; the oldest are dropped first
pub const MILESTONE_CAPACITY: usize = 1000;

/// Timestamped entry of a document's milestone log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl std::fmt::Display for Milestone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Progress of one document within a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentProgress {
    pub document_type: String,
    /// Percentage in `0..=100`
    pub progress: f64,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub milestones: VecDeque<Milestone>,
}

impl DocumentProgress {
    fn new(document_type: &str, now: DateTime<Utc>) -> Self {
        let mut document = Self {
            document_type: document_type.to_string(),
            progress: 0.0,
            status: STATUS_STARTING.to_string(),
            started_at: now,
            completed_at: None,
            error: None,
            milestones: VecDeque::new(),
        };
        document.add_milestone("Generation started".to_string(), now);
        document
    }

    fn add_milestone(&mut self, message: String, now: DateTime<Utc>) {
        if self.milestones.len() >= MILESTONE_CAPACITY {
            self.milestones.pop_front();
        }
        self.milestones.push_back(Milestone {
            timestamp: now,
            message,
        });
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.status == STATUS_FAILED
    }

    /// Completed without failure
    pub fn succeeded(&self) -> bool {
        self.is_completed() && !self.is_failed()
    }

    /// Wall time from start to completion
    pub fn generation_time(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }
}

/// Aggregated progress of every tracked document of a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentGenerationStatus {
    pub project_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub overall_progress: f64,
    pub has_errors: bool,
    pub is_complete: bool,
    pub documents: BTreeMap<String, DocumentProgress>,
}

impl DocumentGenerationStatus {
    pub fn new(project_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            project_id: project_id.to_string(),
            started_at: now,
            completed_at: None,
            overall_progress: 0.0,
            has_errors: false,
            is_complete: false,
            documents: BTreeMap::new(),
        }
    }

    /// Begin tracking a document; an existing entry is restarted
    pub fn start_document(&mut self, document_type: &str, now: DateTime<Utc>) -> &DocumentProgress {
        self.documents
            .insert(document_type.to_string(), DocumentProgress::new(document_type, now));
        self.recompute(now);
        &self.documents[document_type]
    }

    /// Record progress for a document, creating the entry on first use.
    ///
    /// Reaching 100 marks the document completed with the given status. Any
    /// lower value reopens a completed document, so a project is complete only
    /// while each document is at 100 or was explicitly finished since.
    pub fn update_document(
        &mut self,
        document_type: &str,
        progress: f64,
        status: &str,
        now: DateTime<Utc>,
    ) -> Result<&DocumentProgress> {
        validate_progress(progress)?;

        let document = self
            .documents
            .entry(document_type.to_string())
            .or_insert_with(|| DocumentProgress::new(document_type, now));
        document.progress = progress;
        document.status = status.to_string();
        document.add_milestone(format!("{}: {:.0}%", status, progress), now);
        if progress >= 100.0 {
            document.completed_at.get_or_insert(now);
        } else if document.completed_at.take().is_some() {
            document.error = None;
        }

        self.recompute(now);
        Ok(&self.documents[document_type])
    }

    /// Mark a tracked document as finished.
    ///
    /// Progress jumps to 100 only on success; failure keeps the last value and
    /// flags the project as having errors. Either outcome counts as complete.
    pub fn complete_document(
        &mut self,
        document_type: &str,
        success: bool,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&DocumentProgress> {
        let document = self.documents.get_mut(document_type).ok_or_else(|| {
            MonitoringError::not_found(
                "Document",
                format!("{}/{}", self.project_id, document_type),
            )
        })?;

        document.completed_at = Some(now);
        if success {
            document.progress = 100.0;
            document.status = STATUS_COMPLETED.to_string();
            document.add_milestone("Generation completed".to_string(), now);
        } else {
            document.status = STATUS_FAILED.to_string();
            document.add_milestone(
                format!(
                    "Generation failed: {}",
                    error.as_deref().unwrap_or("unknown error")
                ),
                now,
            );
            document.error = error;
            self.has_errors = true;
        }

        self.recompute(now);
        Ok(&self.documents[document_type])
    }

    /// Arithmetic mean of every tracked document's progress
    pub fn mean_document_progress(&self) -> f64 {
        if self.documents.is_empty() {
            return 0.0;
        }
        self.documents.values().map(|d| d.progress).sum::<f64>() / self.documents.len() as f64
    }

    pub fn document_progress_map(&self) -> BTreeMap<String, f64> {
        self.documents
            .iter()
            .map(|(doc_type, doc)| (doc_type.clone(), doc.progress))
            .collect()
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        self.overall_progress = self.mean_document_progress();
        self.is_complete =
            !self.documents.is_empty() && self.documents.values().all(|d| d.is_completed());
        if !self.is_complete {
            self.completed_at = None;
        } else if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }
}

pub(crate) fn validate_progress(progress: f64) -> Result<()> {
    if !progress.is_finite() || !(0.0..=100.0).contains(&progress) {
        return Err(MonitoringError::validation(format!(
            "Progress must be between 0 and 100, got {}",
            progress
        )));
    }
    Ok(())
}

/// Document-level progress notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressNotification {
    pub project_id: String,
    pub document_type: String,
    pub progress: f64,
    pub status: String,
    pub overall_progress: f64,
    pub timestamp: DateTime<Utc>,
}

impl ProgressNotification {
    pub fn new(
        status: &DocumentGenerationStatus,
        document: &DocumentProgress,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: status.project_id.clone(),
            document_type: document.document_type.clone(),
            progress: document.progress,
            status: document.status.clone(),
            overall_progress: status.overall_progress,
            timestamp,
        }
    }
}

/// Project-level progress notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectProgressNotification {
    pub project_id: String,
    pub overall_progress: f64,
    pub has_errors: bool,
    pub is_complete: bool,
    pub document_progress: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl ProjectProgressNotification {
    pub fn new(status: &DocumentGenerationStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            project_id: status.project_id.clone(),
            overall_progress: status.overall_progress,
            has_errors: status.has_errors,
            is_complete: status.is_complete,
            document_progress: status.document_progress_map(),
            timestamp,
        }
    }
}

/// Emitted when a document finishes, successfully or not
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentCompletion {
    pub project_id: String,
    pub document_type: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One record of a project's progress history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressHistoryEntry {
    pub project_id: String,
    pub document_type: String,
    pub progress: f64,
    pub status: String,
    pub overall_progress: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProgressNotification> for ProgressHistoryEntry {
    fn from(n: &ProgressNotification) -> Self {
        Self {
            project_id: n.project_id.clone(),
            document_type: n.document_type.clone(),
            progress: n.progress,
            status: n.status.clone(),
            overall_progress: n.overall_progress,
            timestamp: n.timestamp,
        }
    }
}

//! Progress snapshot for polling and streaming.
//!
//! The snapshot is process-local: a live pipeline owns one in memory, and
//! when no pipeline is live it is derived from the stored context status.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::project::{ProjectContext, ProjectId};
use crate::stage::PipelineStage;

/// Stage string used when a project has no stored context.
pub const STAGE_NOT_FOUND: &str = "not_found";

/// Point-in-time view of a project's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressSnapshot {
    pub project_id: String,
    /// Stage name (a [`PipelineStage`] for live pipelines, the raw stored
    /// status otherwise)
    pub stage: String,
    /// Percentage (0-100)
    pub progress: u8,
    /// Current task description
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    /// Initial snapshot of a freshly constructed pipeline.
    pub fn new(project_id: &ProjectId) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: PipelineStage::Initializing.as_str().to_string(),
            progress: 0,
            task: String::new(),
            error: None,
        }
    }

    /// Move to `stage` with its fixed percentage and task line.
    ///
    /// Entering a stage clears any previous error.
    pub fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage.as_str().to_string();
        self.progress = stage.progress().min(100);
        self.task = stage.task().to_string();
        self.error = None;
    }

    /// Mark as failed, keeping the last percentage and task.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.stage = PipelineStage::Error.as_str().to_string();
        self.error = Some(error.into());
    }

    /// Derive a snapshot from a stored context when no pipeline is live.
    pub fn from_context(project_id: &ProjectId, context: &ProjectContext) -> Self {
        let progress = if context.stage() == Some(PipelineStage::Completed) {
            100
        } else {
            0
        };
        Self {
            project_id: project_id.to_string(),
            stage: context.status.clone(),
            progress,
            task: String::new(),
            error: context.error.clone(),
        }
    }

    /// Snapshot reported for a project that does not exist.
    pub fn not_found(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: STAGE_NOT_FOUND.to_string(),
            progress: 0,
            task: String::new(),
            error: Some("Project not found".to_string()),
        }
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.stage.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        self.stage().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

//! Structured pipeline logging.

use tracing::{error, info, warn, Span};

use anigen_models::{PipelineStage, ProjectId};

/// Logs pipeline lifecycle events with the project id and operation attached.
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    project_id: String,
    operation: &'static str,
}

impl PipelineLogger {
    pub fn new(project_id: &ProjectId, operation: &'static str) -> Self {
        Self {
            project_id: project_id.to_string(),
            operation,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            project_id = %self.project_id,
            operation = self.operation,
            "Pipeline started: {}", message
        );
    }

    pub fn log_stage(&self, stage: PipelineStage, progress: u8) {
        info!(
            project_id = %self.project_id,
            operation = self.operation,
            stage = stage.as_str(),
            progress,
            "Pipeline stage entered"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            project_id = %self.project_id,
            operation = self.operation,
            "Pipeline warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            project_id = %self.project_id,
            operation = self.operation,
            "Pipeline error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            project_id = %self.project_id,
            operation = self.operation,
            "Pipeline completed: {}", message
        );
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span carrying the project id for everything logged inside an operation.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "pipeline",
            project_id = %self.project_id,
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_fields() {
        let id = ProjectId::new();
        let logger = PipelineLogger::new(&id, "run");
        assert_eq!(logger.project_id(), id.as_str());
        assert_eq!(logger.operation(), "run");
    }
}

//! Pipeline error types.

use anigen_llm::LlmError;
use anigen_storage::StorageError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Text-parsing failure, message passed through unchanged
    #[error(transparent)]
    Collaborator(#[from] LlmError),

    #[error("{0}")]
    Validation(String),

    #[error("Pipeline for project {0} is already running")]
    Busy(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::Storage(e) if e.is_not_found())
    }

    /// Bad caller input, including invariant violations caught by the store.
    pub fn is_validation(&self) -> bool {
        match self {
            PipelineError::Validation(_) => true,
            PipelineError::Storage(e) => e.is_validation(),
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, PipelineError::Busy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_message_is_verbatim() {
        let err: PipelineError = LlmError::invalid_response("no json").into();
        assert_eq!(err.to_string(), "Invalid response: no json");
    }

    #[test]
    fn test_classification() {
        let err: PipelineError = StorageError::VersionNotFound(2).into();
        assert!(err.is_not_found());
        assert!(!err.is_validation());

        let err: PipelineError = StorageError::validation("bad").into();
        assert!(err.is_validation());

        assert!(PipelineError::Busy("p1".into()).is_busy());
    }
}

//! Model-level validation errors.

use thiserror::Error;

/// Errors raised while applying a typed field update to a model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("Selected image is not one of the character's candidates: {0}")]
    SelectedImageNotCandidate(String),

    #[error("Camera duration must be positive, got {0}")]
    InvalidCameraDuration(String),

    #[error("Invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("Unknown pipeline stage: {0}")]
    UnknownStage(String),
}

//! Storage error types.

use anigen_models::ModelError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during context store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Character {0} not found")]
    CharacterNotFound(String),

    #[error("Scene {0} not found")]
    SceneNotFound(String),

    #[error("Version {0} not found")]
    VersionNotFound(u64),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn project_not_found(project_id: impl Into<String>) -> Self {
        Self::ProjectNotFound(project_id.into())
    }

    pub fn character_not_found(name: impl Into<String>) -> Self {
        Self::CharacterNotFound(name.into())
    }

    pub fn scene_not_found(id: impl Into<String>) -> Self {
        Self::SceneNotFound(id.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Project, character, scene or version missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ProjectNotFound(_)
                | StorageError::CharacterNotFound(_)
                | StorageError::SceneNotFound(_)
                | StorageError::VersionNotFound(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}

impl From<ModelError> for StorageError {
    fn from(err: ModelError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StorageError::VersionNotFound(3).is_not_found());
        assert!(StorageError::character_not_found("Alice").is_not_found());
        assert!(!StorageError::validation("bad").is_not_found());

        let err: StorageError = ModelError::SelectedImageNotCandidate("x.png".into()).into();
        assert!(err.is_validation());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(StorageError::VersionNotFound(7).to_string(), "Version 7 not found");
        assert_eq!(
            StorageError::character_not_found("Alice").to_string(),
            "Character Alice not found"
        );
    }
}

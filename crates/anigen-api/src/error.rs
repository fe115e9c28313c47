//! API error types.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use anigen_pipeline::PipelineError;
use anigen_storage::StorageError;

use crate::config::ApiConfig;

pub type ApiResult<T> = Result<T, ApiError>;

/// Whether storage and internal error details are withheld from responses.
static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Withhold internal error details when `config.is_production()`.
pub fn configure_error_details(config: &ApiConfig) {
    HIDE_INTERNAL_DETAILS.store(config.is_production(), Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Text-parsing collaborator failed
    #[error("{0}")]
    Collaborator(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Collaborator(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message for the response body.
    fn detail(&self, hide_internal: bool) -> String {
        match self {
            ApiError::NotFound(msg)
            | ApiError::BadRequest(msg)
            | ApiError::Validation(msg)
            | ApiError::Conflict(msg)
            | ApiError::Collaborator(msg) => msg.clone(),
            ApiError::Storage(_) | ApiError::Internal(_) if hide_internal => {
                "An internal error occurred".to_string()
            }
            ApiError::Storage(_) | ApiError::Internal(_) => self.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        if err.is_not_found() {
            ApiError::NotFound(err.to_string())
        } else if let StorageError::Validation(msg) = err {
            ApiError::Validation(msg)
        } else {
            ApiError::Storage(err)
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Storage(e) => e.into(),
            PipelineError::Collaborator(e) => ApiError::Collaborator(e.to_string()),
            PipelineError::Validation(msg) => ApiError::Validation(msg),
            PipelineError::Busy(project_id) => ApiError::Conflict(format!(
                "Pipeline for project {} is already running",
                project_id
            )),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = %status, "Request failed: {}", self);
        }

        let body = ErrorResponse {
            detail: self.detail(HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed)),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use anigen_llm::LlmError;

    use super::*;

    #[test]
    fn test_storage_error_mapping() {
        let err: ApiError = StorageError::VersionNotFound(4).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.detail(false), "Version 4 not found");

        let err: ApiError = StorageError::validation("not a candidate").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ApiError = StorageError::Io(io).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_pipeline_error_mapping() {
        let err: ApiError = PipelineError::Busy("p1".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err: ApiError = PipelineError::from(LlmError::invalid_response(
            "Failed to extract JSON from LLM response",
        ))
        .into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.detail(false),
            "Invalid response: Failed to extract JSON from LLM response"
        );

        let err: ApiError = PipelineError::validation("No candidates available").into();
        assert_eq!(err.detail(false), "No candidates available");
    }

    #[test]
    fn test_internal_details_hidden_in_production() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/srv/context denied");
        let err: ApiError = StorageError::Io(io).into();
        assert!(err.detail(false).contains("/srv/context denied"));
        assert_eq!(err.detail(true), "An internal error occurred");

        let err = ApiError::not_found("Project not found: p1");
        assert_eq!(err.detail(true), "Project not found: p1");
    }
}

//! Project handlers.
//!
//! Wizard flow:
//! - `parse-text` creates a project from novel text
//! - `confirm-character` picks one candidate image per character
//! - `continue-generation` walks the remaining stages
//!
//! plus progress polling, context reads, history and rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use anigen_models::{Character, ProgressSnapshot, ProjectContext, ProjectId, Scene};
use anigen_pipeline::GenerationPipeline;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ParseTextRequest {
    #[validate(length(min = 1, max = 200000, message = "text must be 1-200000 characters"))]
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct ParseTextResponse {
    pub project_id: String,
    pub status: String,
    pub characters: BTreeMap<String, Character>,
    pub scenes: Vec<Scene>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmCharacterRequest {
    pub project_id: String,
    #[validate(length(min = 1, message = "character_name must not be empty"))]
    pub character_name: String,
    #[validate(range(min = 0, message = "selected_image_index must not be negative"))]
    pub selected_image_index: i64,
}

#[derive(Debug, Serialize)]
pub struct ConfirmCharacterResponse {
    pub status: &'static str,
    pub character: String,
    pub selected_image: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_id: String,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub project_id: String,
    pub context: ProjectContext,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub project_id: String,
    pub versions: Vec<u64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RollbackRequest {
    pub project_id: String,
    #[validate(range(min = 1, message = "version must be at least 1"))]
    pub version: u64,
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub status: &'static str,
    pub version: u64,
}

// ============================================================================
// Helpers
// ============================================================================

pub(crate) fn parse_project_id(raw: &str) -> ApiResult<ProjectId> {
    ProjectId::parse(raw).map_err(|e| ApiError::validation(e.to_string()))
}

/// Live pipeline for an existing project. Unknown projects are not registered.
async fn existing_pipeline(
    state: &AppState,
    project_id: &ProjectId,
) -> ApiResult<Arc<GenerationPipeline>> {
    if let Some(pipeline) = state.pipelines.get(project_id).await {
        return Ok(pipeline);
    }
    if !state.store(project_id).exists().await? {
        return Err(ApiError::not_found(format!(
            "Project not found: {}",
            project_id
        )));
    }
    Ok(state.pipelines.get_or_create(project_id).await)
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a project from novel text.
///
/// POST /api/parse-text
pub async fn parse_text(
    State(state): State<AppState>,
    Json(request): Json<ParseTextRequest>,
) -> ApiResult<Json<ParseTextResponse>> {
    request.validate()?;
    if request.text.trim().is_empty() {
        return Err(ApiError::validation("text must not be blank"));
    }

    let pipeline = state.pipelines.create().await;
    info!(project_id = %pipeline.project_id(), "Parsing novel text");

    let context = pipeline.run(&request.text).await?;
    metrics::record_project_created();

    Ok(Json(ParseTextResponse {
        project_id: pipeline.project_id().to_string(),
        status: context.status,
        characters: context.characters,
        scenes: context.scenes,
    }))
}

/// Pick a candidate image for a character.
///
/// POST /api/confirm-character
pub async fn confirm_character(
    State(state): State<AppState>,
    Json(request): Json<ConfirmCharacterRequest>,
) -> ApiResult<Json<ConfirmCharacterResponse>> {
    request.validate()?;
    let project_id = parse_project_id(&request.project_id)?;
    let index = usize::try_from(request.selected_image_index)
        .map_err(|_| ApiError::validation("selected_image_index out of range"))?;

    let pipeline = existing_pipeline(&state, &project_id).await?;
    let selected_image = pipeline
        .confirm_character(&request.character_name, index)
        .await?;
    metrics::record_character_confirmed();

    Ok(Json(ConfirmCharacterResponse {
        status: "confirmed",
        character: request.character_name,
        selected_image,
    }))
}

/// Walk the generation stages after character confirmation.
///
/// POST /api/continue-generation?project_id=...
pub async fn continue_generation(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<ProjectContext>> {
    let project_id = parse_project_id(&query.project_id)?;
    let pipeline = existing_pipeline(&state, &project_id).await?;

    let context = pipeline.continue_after_character_confirmation().await?;
    Ok(Json(context))
}

/// Current progress of a project.
///
/// GET /api/task-status/:project_id
pub async fn task_status(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProgressSnapshot>> {
    let project_id = parse_project_id(&project_id)?;
    let snapshot = state.pipelines.progress(&project_id).await?;
    Ok(Json(snapshot))
}

/// GET /api/context/:project_id
pub async fn get_context(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ContextResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let context = state.store(&project_id).load().await?;

    Ok(Json(ContextResponse {
        project_id: project_id.to_string(),
        context,
    }))
}

/// Archived versions, newest first.
///
/// GET /api/context/:project_id/history
pub async fn list_history(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<HistoryResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let store = state.store(&project_id);
    if !store.exists().await? {
        return Err(ApiError::not_found(format!(
            "Project not found: {}",
            project_id
        )));
    }

    let versions = store.list_history_versions().await?;
    Ok(Json(HistoryResponse {
        project_id: project_id.to_string(),
        versions,
    }))
}

/// GET /api/context/:project_id/history/:version
pub async fn get_history_version(
    State(state): State<AppState>,
    Path((project_id, version)): Path<(String, u64)>,
) -> ApiResult<Json<ContextResponse>> {
    let project_id = parse_project_id(&project_id)?;
    let context = state.store(&project_id).load_version(version).await?;

    Ok(Json(ContextResponse {
        project_id: project_id.to_string(),
        context,
    }))
}

/// Restore an archived version as a new version.
///
/// POST /api/rollback
pub async fn rollback(
    State(state): State<AppState>,
    Json(request): Json<RollbackRequest>,
) -> ApiResult<Json<RollbackResponse>> {
    request.validate()?;
    let project_id = parse_project_id(&request.project_id)?;

    // Holds the pipeline's run guard, so a stage walk can't interleave
    let pipeline = existing_pipeline(&state, &project_id).await?;
    let context = pipeline.rollback(request.version).await?;
    metrics::record_rollback();
    info!(
        project_id = %project_id,
        target_version = request.version,
        new_version = context.meta.version,
        "Rollback requested"
    );

    Ok(Json(RollbackResponse {
        status: "rolled_back",
        version: context.meta.version,
    }))
}

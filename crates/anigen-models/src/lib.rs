//! Shared data models for the AniGen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Project context (characters, scenes, version metadata)
//! - Typed partial and single-field updates
//! - Pipeline stages and progress snapshots

pub mod error;
pub mod progress;
pub mod project;
pub mod stage;

// Re-export common types
pub use error::ModelError;
pub use progress::{ProgressSnapshot, STAGE_NOT_FOUND};
pub use project::{
    is_valid_project_id, Camera, Character, CharacterUpdate, ContextPatch, ProjectContext,
    ProjectId, ProjectMeta, Scene, SceneUpdate, MAX_PROJECT_ID_LEN,
};
pub use stage::{PipelineStage, GENERATION_SEQUENCE};

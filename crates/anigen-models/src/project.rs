//! Project context: the single persisted aggregate for one project.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;
use crate::stage::PipelineStage;

/// Maximum length of a project id (it is used as a directory name).
pub const MAX_PROJECT_ID_LEN: usize = 64;

/// Unique identifier for a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Generate a new random project ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an externally supplied id.
    ///
    /// Only `[A-Za-z0-9_-]` up to 64 chars is accepted so the id is always a
    /// safe single path component.
    pub fn parse(s: impl Into<String>) -> Result<Self, ModelError> {
        let s = s.into();
        if is_valid_project_id(&s) {
            Ok(Self(s))
        } else {
            Err(ModelError::InvalidProjectId(s))
        }
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate project id format. No path traversal.
pub fn is_valid_project_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_PROJECT_ID_LEN {
        return false;
    }
    id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Version metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectMeta {
    /// Incremented by exactly one on every save
    pub version: u64,
    /// Fixed at initialization
    pub created_at: DateTime<Utc>,
    /// Refreshed on every save
    pub updated_at: DateTime<Utc>,
}

/// A character extracted from the novel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Character {
    #[serde(default)]
    pub description: String,
    /// Candidate artwork references, in generation order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    /// Must be one of `candidates`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora_model: Option<String>,
}

impl Character {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Candidate list, empty when none were generated.
    pub fn candidates(&self) -> &[String] {
        self.candidates.as_deref().unwrap_or_default()
    }

    /// A selected image must be one of the candidates.
    pub fn validate(&self) -> Result<(), ModelError> {
        match &self.selected_image {
            Some(image) if !self.candidates().contains(image) => {
                Err(ModelError::SelectedImageNotCandidate(image.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Camera movement for a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Camera {
    /// Shot type, e.g. `push_in`, `pan`, `close_up`
    #[serde(rename = "type")]
    pub kind: String,
    /// Shot length in seconds, always > 0
    pub duration_s: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            kind: "wide_shot".to_string(),
            duration_s: 6.0,
        }
    }
}

impl Camera {
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.duration_s > 0.0 && self.duration_s.is_finite() {
            Ok(())
        } else {
            Err(ModelError::InvalidCameraDuration(self.duration_s.to_string()))
        }
    }
}

/// One scene of the storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    /// Unique, stable id (e.g. `scene_01`)
    pub id: String,
    #[serde(default)]
    pub setting: String,
    /// Names of characters appearing in the scene (keys of `characters`)
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub camera: Camera,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

impl Scene {
    pub fn new(id: impl Into<String>, setting: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            setting: setting.into(),
            characters: Vec::new(),
            camera: Camera::default(),
            dialogue: None,
            keyframe: None,
            video: None,
        }
    }
}

/// The persisted state of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectContext {
    pub meta: ProjectMeta,
    /// Stage name. Kept as a string so values written through a partial
    /// update survive a round-trip; see [`ProjectContext::stage`].
    pub status: String,
    #[serde(default)]
    pub characters: BTreeMap<String, Character>,
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectContext {
    /// Fresh context at version 1 with status `text_parsed`.
    pub fn new(characters: BTreeMap<String, Character>, scenes: Vec<Scene>) -> Self {
        let now = Utc::now();
        Self {
            meta: ProjectMeta {
                version: 1,
                created_at: now,
                updated_at: now,
            },
            status: PipelineStage::TextParsed.as_str().to_string(),
            characters,
            scenes,
            final_video: None,
            error: None,
        }
    }

    /// Known stage for the current status, if it names one.
    pub fn stage(&self) -> Option<PipelineStage> {
        self.status.parse().ok()
    }

    pub fn set_stage(&mut self, stage: PipelineStage) {
        self.status = stage.as_str().to_string();
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    pub fn scene_mut(&mut self, id: &str) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|s| s.id == id)
    }

    /// `(scene_id, character_name)` pairs whose character is not a key of
    /// `characters`.
    pub fn dangling_character_refs(&self) -> Vec<(String, String)> {
        self.scenes
            .iter()
            .flat_map(|scene| {
                scene
                    .characters
                    .iter()
                    .filter(|name| !self.characters.contains_key(name.as_str()))
                    .map(move |name| (scene.id.clone(), name.clone()))
            })
            .collect()
    }

    /// Names of characters that have no selected image yet.
    pub fn unconfirmed_characters(&self) -> Vec<&str> {
        self.characters
            .iter()
            .filter(|(_, c)| c.selected_image.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Check the character and camera invariants. Dangling character refs
    /// in scenes are allowed.
    pub fn validate(&self) -> Result<(), ModelError> {
        for character in self.characters.values() {
            character.validate()?;
        }
        for scene in &self.scenes {
            scene.camera.validate()?;
        }
        Ok(())
    }

    /// Compare everything except version metadata.
    pub fn same_content(&self, other: &ProjectContext) -> bool {
        self.status == other.status
            && self.characters == other.characters
            && self.scenes == other.scenes
            && self.final_video == other.final_video
            && self.error == other.error
    }
}

/// Shallow partial update over the top-level fields of a context.
///
/// Fields left as `None` keep their current value. `meta` is never part of a
/// patch; versioning belongs to the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContextPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<BTreeMap<String, Character>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenes: Option<Vec<Scene>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ContextPatch {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Merge the patch over `context`.
    pub fn apply_to(self, context: &mut ProjectContext) {
        if let Some(status) = self.status {
            context.status = status;
        }
        if let Some(characters) = self.characters {
            context.characters = characters;
        }
        if let Some(scenes) = self.scenes {
            context.scenes = scenes;
        }
        if let Some(final_video) = self.final_video {
            context.final_video = Some(final_video);
        }
        if let Some(error) = self.error {
            context.error = Some(error);
        }
    }
}

/// Typed single-field update of a [`Character`].
#[derive(Debug, Clone, PartialEq)]
pub enum CharacterUpdate {
    Description(String),
    Candidates(Vec<String>),
    SelectedImage(String),
    LoraModel(String),
}

impl CharacterUpdate {
    /// Field name, for logging.
    pub fn field(&self) -> &'static str {
        match self {
            CharacterUpdate::Description(_) => "description",
            CharacterUpdate::Candidates(_) => "candidates",
            CharacterUpdate::SelectedImage(_) => "selected_image",
            CharacterUpdate::LoraModel(_) => "lora_model",
        }
    }

    /// Apply to `character`, keeping `selected_image` within `candidates`.
    pub fn apply(self, character: &mut Character) -> Result<(), ModelError> {
        match self {
            CharacterUpdate::Description(description) => character.description = description,
            CharacterUpdate::Candidates(candidates) => {
                // A replaced candidate list invalidates a selection it no longer contains.
                if let Some(selected) = &character.selected_image {
                    if !candidates.contains(selected) {
                        character.selected_image = None;
                    }
                }
                character.candidates = Some(candidates);
            }
            CharacterUpdate::SelectedImage(image) => {
                if !character.candidates().contains(&image) {
                    return Err(ModelError::SelectedImageNotCandidate(image));
                }
                character.selected_image = Some(image);
            }
            CharacterUpdate::LoraModel(model) => character.lora_model = Some(model),
        }
        Ok(())
    }
}

/// Typed single-field update of a [`Scene`].
#[derive(Debug, Clone, PartialEq)]
pub enum SceneUpdate {
    Setting(String),
    Characters(Vec<String>),
    Camera(Camera),
    Dialogue(BTreeMap<String, String>),
    Keyframe(String),
    Video(String),
}

impl SceneUpdate {
    pub fn field(&self) -> &'static str {
        match self {
            SceneUpdate::Setting(_) => "setting",
            SceneUpdate::Characters(_) => "characters",
            SceneUpdate::Camera(_) => "camera",
            SceneUpdate::Dialogue(_) => "dialogue",
            SceneUpdate::Keyframe(_) => "keyframe",
            SceneUpdate::Video(_) => "video",
        }
    }

    pub fn apply(self, scene: &mut Scene) -> Result<(), ModelError> {
        match self {
            SceneUpdate::Setting(setting) => scene.setting = setting,
            SceneUpdate::Characters(characters) => scene.characters = characters,
            SceneUpdate::Camera(camera) => {
                camera.validate()?;
                scene.camera = camera;
            }
            SceneUpdate::Dialogue(dialogue) => scene.dialogue = Some(dialogue),
            SceneUpdate::Keyframe(keyframe) => scene.keyframe = Some(keyframe),
            SceneUpdate::Video(video) => scene.video = Some(video),
        }
        Ok(())
    }
}

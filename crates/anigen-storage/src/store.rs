//! Versioned, file-backed project context store.
//!
//! Layout under the repository root:
//!
//! ```text
//! {root}/{project_id}/context.json        current state, replaced in place
//! {root}/{project_id}/history/v{N}.json   snapshot of version N
//! ```
//!
//! Every save archives the previous current state under *its own* version
//! number before writing the new state with version + 1. Version N's content
//! therefore only appears in history once version N+1 has been saved.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use anigen_models::{
    Character, CharacterUpdate, ContextPatch, ProjectContext, ProjectId, Scene, SceneUpdate,
};

use crate::config::StoreConfig;
use crate::error::{StorageError, StorageResult};
use crate::fs_utils::{read_optional, write_atomic};
use crate::locks::ProjectLocks;

const CONTEXT_FILE: &str = "context.json";
const HISTORY_DIR: &str = "history";

/// History file name for a version.
fn history_file_name(version: u64) -> String {
    format!("v{}.json", version)
}

/// Parse a history file name back into its version.
fn parse_history_file_name(name: &str) -> Option<u64> {
    name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
}

/// Root of all project stores; hands out per-project [`ContextStore`]s that
/// share one lock table.
#[derive(Clone)]
pub struct ContextRepository {
    root: PathBuf,
    locks: ProjectLocks,
}

impl ContextRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: ProjectLocks::new(),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.context_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store bound to one project.
    pub fn store(&self, project_id: ProjectId) -> ContextStore {
        let project_dir = self.root.join(project_id.as_str());
        ContextStore {
            context_path: project_dir.join(CONTEXT_FILE),
            history_dir: project_dir.join(HISTORY_DIR),
            project_dir,
            project_id,
            locks: self.locks.clone(),
        }
    }

    /// Verify the root can be created and written (readiness probe).
    pub async fn check_writable(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".ready-probe");
        write_atomic(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;
        Ok(())
    }

    /// Drop lock entries for projects with no writer in flight.
    pub async fn prune_locks(&self) -> usize {
        self.locks.prune().await
    }
}

/// Durable, versioned CRUD over one project's context.
#[derive(Clone)]
pub struct ContextStore {
    project_id: ProjectId,
    project_dir: PathBuf,
    context_path: PathBuf,
    history_dir: PathBuf,
    locks: ProjectLocks,
}

impl ContextStore {
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    fn history_path(&self, version: u64) -> PathBuf {
        self.history_dir.join(history_file_name(version))
    }

    async fn ensure_directories(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.history_dir).await?;
        Ok(())
    }

    /// Whether a current state exists.
    pub async fn exists(&self) -> StorageResult<bool> {
        Ok(fs::try_exists(&self.context_path).await?)
    }

    /// Create the storage location and write a fresh version-1 context.
    pub async fn initialize(
        &self,
        characters: BTreeMap<String, Character>,
        scenes: Vec<Scene>,
    ) -> StorageResult<ProjectContext> {
        let context = ProjectContext::new(characters, scenes);
        context.validate()?;

        let _guard = self.locks.acquire(&self.project_id).await;
        self.ensure_directories().await?;

        let context = self.save_locked(context).await?;

        info!(
            project_id = %self.project_id,
            characters = context.characters.len(),
            scenes = context.scenes.len(),
            version = context.meta.version,
            "Initialized project context"
        );
        Ok(context)
    }

    /// Read the current state.
    pub async fn load(&self) -> StorageResult<ProjectContext> {
        self.read_current()
            .await?
            .map(|(_, context)| context)
            .ok_or_else(|| StorageError::project_not_found(self.project_id.as_str()))
    }

    /// Archive the current state and write `context` as the next version.
    ///
    /// The caller-supplied `meta.version` is always overwritten.
    pub async fn save(&self, context: ProjectContext) -> StorageResult<ProjectContext> {
        let _guard = self.locks.acquire(&self.project_id).await;
        self.save_locked(context).await
    }

    /// Shallow-merge `patch` over the current state and save.
    pub async fn update(&self, patch: ContextPatch) -> StorageResult<ProjectContext> {
        let _guard = self.locks.acquire(&self.project_id).await;
        let mut context = self.load().await?;
        patch.apply_to(&mut context);
        self.save_locked(context).await
    }

    pub async fn update_status(&self, status: &str) -> StorageResult<()> {
        let _guard = self.locks.acquire(&self.project_id).await;
        let mut context = self.load().await?;
        context.status = status.to_string();
        self.save_locked(context).await?;
        Ok(())
    }

    /// Set one field of a character. Nothing is written if the character is
    /// missing or the update is rejected.
    pub async fn update_character(&self, name: &str, update: CharacterUpdate) -> StorageResult<()> {
        let _guard = self.locks.acquire(&self.project_id).await;
        let mut context = self.load().await?;
        let field = update.field();

        let character = context
            .characters
            .get_mut(name)
            .ok_or_else(|| StorageError::character_not_found(name))?;
        update.apply(character)?;

        let saved = self.save_locked(context).await?;
        debug!(
            project_id = %self.project_id,
            character = name,
            field,
            version = saved.meta.version,
            "Updated character"
        );
        Ok(())
    }

    /// Set one field of a scene. Nothing is written if the scene is missing
    /// or the update is rejected.
    pub async fn update_scene(&self, scene_id: &str, update: SceneUpdate) -> StorageResult<()> {
        let _guard = self.locks.acquire(&self.project_id).await;
        let mut context = self.load().await?;
        let field = update.field();

        let scene = context
            .scene_mut(scene_id)
            .ok_or_else(|| StorageError::scene_not_found(scene_id))?;
        update.apply(scene)?;

        let saved = self.save_locked(context).await?;
        debug!(
            project_id = %self.project_id,
            scene_id,
            field,
            version = saved.meta.version,
            "Updated scene"
        );
        Ok(())
    }

    /// Restore the content archived under `target_version` as a new version.
    ///
    /// The pre-rollback state is archived first; history is append-only.
    pub async fn rollback(&self, target_version: u64) -> StorageResult<ProjectContext> {
        let _guard = self.locks.acquire(&self.project_id).await;
        let historical = self.load_version(target_version).await?;
        let restored = self.save_locked(historical).await?;

        info!(
            project_id = %self.project_id,
            target_version,
            new_version = restored.meta.version,
            "Rolled back project context"
        );
        Ok(restored)
    }

    /// Read the snapshot archived under `version`.
    pub async fn load_version(&self, version: u64) -> StorageResult<ProjectContext> {
        let bytes = read_optional(&self.history_path(version))
            .await?
            .ok_or(StorageError::VersionNotFound(version))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Archived version numbers, newest first.
    pub async fn list_history_versions(&self) -> StorageResult<Vec<u64>> {
        let mut entries = match fs::read_dir(&self.history_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(version) = entry.file_name().to_str().and_then(parse_history_file_name) {
                versions.push(version);
            }
        }

        versions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(versions)
    }

    /// Current state as raw bytes plus parsed context.
    async fn read_current(&self) -> StorageResult<Option<(Vec<u8>, ProjectContext)>> {
        match read_optional(&self.context_path).await? {
            Some(bytes) => {
                let context = serde_json::from_slice(&bytes)?;
                Ok(Some((bytes, context)))
            }
            None => Ok(None),
        }
    }

    /// Save without taking the lock; callers must hold it.
    ///
    /// An invalid context is rejected before anything is archived or written.
    async fn save_locked(&self, mut context: ProjectContext) -> StorageResult<ProjectContext> {
        context.validate()?;
        self.ensure_directories().await?;

        let next_version = match self.read_current().await? {
            Some((bytes, predecessor)) => {
                let version = predecessor.meta.version;
                write_atomic(&self.history_path(version), &bytes).await?;
                debug!(
                    project_id = %self.project_id,
                    version,
                    "Archived context snapshot"
                );
                version + 1
            }
            None => 1,
        };

        context.meta.version = next_version;
        context.meta.updated_at = Utc::now();

        let json = serde_json::to_vec_pretty(&context)?;
        write_atomic(&self.context_path, &json).await?;

        debug!(
            project_id = %self.project_id,
            version = next_version,
            status = %context.status,
            "Saved project context"
        );
        Ok(context)
    }
}

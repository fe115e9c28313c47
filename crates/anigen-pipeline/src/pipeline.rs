//! Generation pipeline state machine.
//!
//! `run` parses novel text and initializes the project context, then stops at
//! `waiting_character_confirmation`. After the user confirms artwork,
//! `continue_after_character_confirmation` walks the remaining stages,
//! persisting the status after each one.
//!
//! Progress lives in memory and is published on a broadcast channel; the
//! durable counterpart is the context `status`.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use metrics::counter;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, Instrument};

use anigen_llm::NovelParser;
use anigen_models::{
    CharacterUpdate, ContextPatch, PipelineStage, ProgressSnapshot, ProjectContext, ProjectId,
    GENERATION_SEQUENCE,
};
use anigen_storage::{ContextRepository, ContextStore, StorageError};

use crate::error::{PipelineError, PipelineResult};
use crate::logging::PipelineLogger;

/// Buffered progress messages per subscriber.
const PROGRESS_CHANNEL_CAPACITY: usize = 32;

const STAGE_TRANSITIONS_TOTAL: &str = "anigen_pipeline_stage_transitions_total";
const PIPELINE_FAILURES_TOTAL: &str = "anigen_pipeline_failures_total";

/// One project's generation pipeline.
pub struct GenerationPipeline {
    project_id: ProjectId,
    store: ContextStore,
    parser: Arc<dyn NovelParser>,
    progress: RwLock<ProgressSnapshot>,
    updates: broadcast::Sender<ProgressSnapshot>,
    /// Held for the duration of a stage walk
    running: Mutex<()>,
    last_activity: RwLock<Instant>,
}

impl GenerationPipeline {
    /// Create a pipeline bound to `project_id`, or to a fresh id.
    pub fn new(
        repository: &ContextRepository,
        parser: Arc<dyn NovelParser>,
        project_id: Option<ProjectId>,
    ) -> Self {
        let project_id = project_id.unwrap_or_default();
        let (updates, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);

        Self {
            store: repository.store(project_id.clone()),
            progress: RwLock::new(ProgressSnapshot::new(&project_id)),
            project_id,
            parser,
            updates,
            running: Mutex::new(()),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Current in-memory progress. Never touches storage.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receive every progress change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressSnapshot> {
        self.updates.subscribe()
    }

    /// Whether a stage walk is in flight.
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Time since the last progress change or registry lookup.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub(crate) fn touch(&self) {
        *self
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn begin(&self) -> PipelineResult<MutexGuard<'_, ()>> {
        self.running
            .try_lock()
            .map_err(|_| PipelineError::Busy(self.project_id.to_string()))
    }

    fn publish(&self, snapshot: ProgressSnapshot) {
        self.touch();
        // No subscribers is fine
        let _ = self.updates.send(snapshot);
    }

    fn enter(&self, stage: PipelineStage, logger: &PipelineLogger) {
        let snapshot = {
            let mut progress = self.progress.write().unwrap_or_else(PoisonError::into_inner);
            progress.enter(stage);
            progress.clone()
        };
        logger.log_stage(stage, snapshot.progress);
        counter!(STAGE_TRANSITIONS_TOTAL, "stage" => stage.as_str()).increment(1);
        self.publish(snapshot);
    }

    fn fail(&self, message: &str, logger: &PipelineLogger) {
        let snapshot = {
            let mut progress = self.progress.write().unwrap_or_else(PoisonError::into_inner);
            progress.fail(message);
            progress.clone()
        };
        logger.log_error(message);
        counter!(PIPELINE_FAILURES_TOTAL, "operation" => logger.operation().to_string())
            .increment(1);
        self.publish(snapshot);
    }

    /// Parse `text` and initialize the project context.
    ///
    /// On failure progress moves to `error` and nothing is persisted.
    pub async fn run(&self, text: &str) -> PipelineResult<ProjectContext> {
        let _running = self.begin()?;
        let logger = PipelineLogger::new(&self.project_id, "run");
        logger.log_start(&format!("{} chars of text", text.chars().count()));

        let result = self
            .run_stages(text, &logger)
            .instrument(logger.create_span())
            .await;

        match result {
            Ok(context) => {
                logger.log_completion(&format!(
                    "{} characters, {} scenes",
                    context.characters.len(),
                    context.scenes.len()
                ));
                Ok(context)
            }
            Err(e) => {
                self.fail(&e.to_string(), &logger);
                Err(e)
            }
        }
    }

    async fn run_stages(&self, text: &str, logger: &PipelineLogger) -> PipelineResult<ProjectContext> {
        self.enter(PipelineStage::ParsingText, logger);
        let parsed = self.parser.parse_novel_to_scenes(text).await?;

        self.enter(PipelineStage::TextParsed, logger);
        let context = self.store.initialize(parsed.characters, parsed.scenes).await?;

        for (scene_id, name) in context.dangling_character_refs() {
            logger.log_warning(&format!(
                "Scene {} references unknown character {}",
                scene_id, name
            ));
        }

        self.enter(PipelineStage::WaitingCharacterConfirmation, logger);
        Ok(context)
    }

    /// Walk the generation stages to `completed`.
    ///
    /// On failure progress moves to `error` and the message is recorded in
    /// the context on a best-effort basis.
    pub async fn continue_after_character_confirmation(&self) -> PipelineResult<ProjectContext> {
        let _running = self.begin()?;
        let logger = PipelineLogger::new(&self.project_id, "continue");
        logger.log_start("continuing after character confirmation");

        let result = self
            .generation_stages(&logger)
            .instrument(logger.create_span())
            .await;

        match result {
            Ok(context) => {
                logger.log_completion(&format!("version {}", context.meta.version));
                Ok(context)
            }
            Err(e) => {
                let message = e.to_string();
                self.fail(&message, &logger);
                if let Err(persist_err) = self.store.update(ContextPatch::error(&message)).await {
                    logger.log_warning(&format!("Failed to record error: {}", persist_err));
                }
                Err(e)
            }
        }
    }

    async fn generation_stages(&self, logger: &PipelineLogger) -> PipelineResult<ProjectContext> {
        let context = self.store.load().await?;

        let unconfirmed = context.unconfirmed_characters();
        if !unconfirmed.is_empty() {
            logger.log_warning(&format!(
                "Continuing with unconfirmed characters: {}",
                unconfirmed.join(", ")
            ));
        }

        for stage in GENERATION_SEQUENCE {
            self.enter(stage, logger);
            self.store.update_status(stage.as_str()).await?;
        }

        Ok(self.store.load().await?)
    }

    /// Restore the context archived under `version` as a new version.
    ///
    /// Refused with `Busy` while a stage walk is in flight. Progress is reset
    /// to the restored status.
    pub async fn rollback(&self, version: u64) -> PipelineResult<ProjectContext> {
        let _running = self.begin()?;
        let context = self.store.rollback(version).await?;

        let snapshot = ProgressSnapshot::from_context(&self.project_id, &context);
        *self.progress.write().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.publish(snapshot);

        debug!(
            project_id = %self.project_id,
            target_version = version,
            new_version = context.meta.version,
            "Rolled back pipeline"
        );
        Ok(context)
    }

    /// Select candidate `index` as the character's artwork.
    ///
    /// Returns the selected image reference.
    pub async fn confirm_character(&self, name: &str, index: usize) -> PipelineResult<String> {
        self.touch();
        let context = self.store.load().await?;
        let character = context
            .characters
            .get(name)
            .ok_or_else(|| StorageError::character_not_found(name))?;

        let candidates = character.candidates();
        if candidates.is_empty() {
            return Err(PipelineError::validation("No candidates available"));
        }
        let image = candidates.get(index).cloned().ok_or_else(|| {
            PipelineError::validation(format!(
                "Selected image index {} out of range ({} candidates)",
                index,
                candidates.len()
            ))
        })?;

        self.store
            .update_character(name, CharacterUpdate::SelectedImage(image.clone()))
            .await?;

        debug!(project_id = %self.project_id, character = name, image = %image, "Confirmed character");
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anigen_llm::LlmError;
    use anigen_models::Character;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::{sample_novel, BlockingParser, FailingParser, StubParser};

    fn pipeline_with(dir: &TempDir, parser: Arc<dyn NovelParser>) -> GenerationPipeline {
        GenerationPipeline::new(&ContextRepository::new(dir.path()), parser, None)
    }

    #[test]
    fn test_new_pipeline_progress() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::default()));
        let progress = pipeline.progress();
        assert_eq!(progress.stage, "initializing");
        assert_eq!(progress.progress, 0);
        assert_eq!(progress.task, "");
        assert_eq!(progress.project_id, pipeline.project_id().as_str());
    }

    #[test]
    fn test_explicit_project_id_is_kept() {
        let dir = TempDir::new().unwrap();
        let id = ProjectId::parse("proj_1").unwrap();
        let pipeline = GenerationPipeline::new(
            &ContextRepository::new(dir.path()),
            Arc::new(StubParser::default()),
            Some(id.clone()),
        );
        assert_eq!(pipeline.project_id(), &id);
    }

    #[tokio::test]
    async fn test_run_initializes_context() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(sample_novel())));

        let context = pipeline.run("Xiao Ming went to school.").await.unwrap();

        assert_eq!(context.meta.version, 1);
        assert_eq!(context.status, "text_parsed");
        assert!(context.characters.contains_key("小明"));

        let progress = pipeline.progress();
        assert_eq!(progress.stage(), Some(PipelineStage::WaitingCharacterConfirmation));
        assert_eq!(progress.progress, 100);
        assert_eq!(progress.task, "Waiting for character confirmation");

        let stored = pipeline.store().load().await.unwrap();
        assert_eq!(stored, context);
    }

    #[tokio::test]
    async fn test_run_failure_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(FailingParser));

        let err = pipeline.run("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Collaborator(LlmError::RateLimited)));

        let progress = pipeline.progress();
        assert_eq!(progress.stage(), Some(PipelineStage::Error));
        assert_eq!(progress.progress, 10);
        assert_eq!(progress.error.as_deref(), Some("Rate limited by LLM service"));
        assert!(!pipeline.store().exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_publishes_each_stage() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(sample_novel())));
        let mut rx = pipeline.subscribe();

        pipeline.run("text").await.unwrap();

        let mut stages = Vec::new();
        while let Ok(snapshot) = rx.try_recv() {
            stages.push((snapshot.stage, snapshot.progress));
        }
        assert_eq!(
            stages,
            vec![
                ("parsing_text".to_string(), 10),
                ("text_parsed".to_string(), 30),
                ("waiting_character_confirmation".to_string(), 100),
            ]
        );
    }

    #[tokio::test]
    async fn test_continue_walks_to_completed() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(sample_novel())));
        pipeline.run("text").await.unwrap();

        let context = pipeline.continue_after_character_confirmation().await.unwrap();

        assert_eq!(context.stage(), Some(PipelineStage::Completed));
        assert_eq!(context.meta.version, 6);
        assert_eq!(
            pipeline.store().list_history_versions().await.unwrap(),
            vec![5, 4, 3, 2, 1]
        );
        assert_eq!(
            pipeline.store().load_version(2).await.unwrap().status,
            "generating_character_images"
        );

        let progress = pipeline.progress();
        assert_eq!(progress.stage(), Some(PipelineStage::Completed));
        assert_eq!(progress.progress, 100);
        assert_eq!(progress.task, "Generation completed");
    }

    #[tokio::test]
    async fn test_continue_missing_project_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::default()));

        let err = pipeline
            .continue_after_character_confirmation()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Storage(StorageError::ProjectNotFound(_))
        ));
        assert_eq!(pipeline.progress().stage(), Some(PipelineStage::Error));
        assert!(!pipeline.store().exists().await.unwrap());
        assert!(!pipeline.store().project_dir().exists());
    }

    #[tokio::test]
    async fn test_concurrent_run_is_busy() {
        let dir = TempDir::new().unwrap();
        let parser = Arc::new(BlockingParser::new());
        let pipeline = Arc::new(pipeline_with(&dir, parser.clone()));

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run("text").await })
        };
        parser.wait_until_called().await;
        assert!(pipeline.is_running());

        let err = pipeline.continue_after_character_confirmation().await.unwrap_err();
        assert!(err.is_busy());

        parser.release();
        first.await.unwrap().unwrap();
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn test_rollback_resets_progress() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(sample_novel())));
        pipeline.run("text").await.unwrap();
        pipeline.continue_after_character_confirmation().await.unwrap();
        let mut rx = pipeline.subscribe();

        let context = pipeline.rollback(1).await.unwrap();
        assert_eq!(context.meta.version, 7);
        assert_eq!(context.status, "text_parsed");

        let progress = pipeline.progress();
        assert_eq!(progress.stage, "text_parsed");
        assert_eq!(progress.progress, 0);
        assert_eq!(rx.try_recv().unwrap().stage, "text_parsed");
    }

    #[tokio::test]
    async fn test_rollback_while_running_is_busy() {
        let dir = TempDir::new().unwrap();
        let parser = Arc::new(BlockingParser::new());
        let pipeline = Arc::new(pipeline_with(&dir, parser.clone()));

        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.run("text").await })
        };
        parser.wait_until_called().await;

        let err = pipeline.rollback(1).await.unwrap_err();
        assert!(err.is_busy());

        parser.release();
        first.await.unwrap().unwrap();
        assert_eq!(pipeline.store().load().await.unwrap().meta.version, 1);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_parser_output() {
        let dir = TempDir::new().unwrap();
        let mut novel = sample_novel();
        novel.characters.insert(
            "A".to_string(),
            Character {
                candidates: Some(vec!["a.png".into()]),
                selected_image: Some("ghost.png".into()),
                ..Default::default()
            },
        );
        novel.scenes[0].camera.duration_s = -3.0;
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(novel)));

        let err = pipeline.run("t").await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(pipeline.progress().stage(), Some(PipelineStage::Error));
        assert!(!pipeline.store().exists().await.unwrap());
    }

    async fn confirmed_setup(dir: &TempDir) -> GenerationPipeline {
        let pipeline = pipeline_with(dir, Arc::new(StubParser::new(sample_novel())));
        pipeline.run("text").await.unwrap();
        pipeline
            .store()
            .update_character(
                "小明",
                CharacterUpdate::Candidates(vec!["xm_0.png".into(), "xm_1.png".into()]),
            )
            .await
            .unwrap();
        pipeline
    }

    #[tokio::test]
    async fn test_confirm_character() {
        let dir = TempDir::new().unwrap();
        let pipeline = confirmed_setup(&dir).await;

        let image = pipeline.confirm_character("小明", 1).await.unwrap();
        assert_eq!(image, "xm_1.png");

        let context = pipeline.store().load().await.unwrap();
        assert_eq!(
            context.characters["小明"].selected_image.as_deref(),
            Some("xm_1.png")
        );
        assert_eq!(context.meta.version, 3);
    }

    #[tokio::test]
    async fn test_confirm_index_out_of_range_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pipeline = confirmed_setup(&dir).await;

        let err = pipeline.confirm_character("小明", 2).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(pipeline.store().load().await.unwrap().meta.version, 2);
    }

    #[tokio::test]
    async fn test_confirm_without_candidates() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::new(sample_novel())));
        pipeline.run("text").await.unwrap();

        let err = pipeline.confirm_character("小明", 0).await.unwrap_err();
        assert_eq!(err.to_string(), "No candidates available");

        let err = pipeline.confirm_character("Nobody", 0).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_continue_failure_records_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline_with(&dir, Arc::new(StubParser::default()));
        let mut characters = BTreeMap::new();
        characters.insert("A".to_string(), Character::new("a"));
        pipeline.store().initialize(characters, Vec::new()).await.unwrap();

        // Corrupt the current state so the first status write fails to load
        tokio::fs::write(pipeline.store().project_dir().join("context.json"), b"{")
            .await
            .unwrap();

        let err = pipeline.continue_after_character_confirmation().await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(StorageError::Json(_))));
        assert_eq!(pipeline.progress().stage(), Some(PipelineStage::Error));
        assert!(pipeline.progress().error.is_some());
    }
}

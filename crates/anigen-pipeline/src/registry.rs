//! Registry of live pipelines.
//!
//! Pipelines stay registered between requests so progress can be polled while
//! a stage walk is in flight. Entries are evicted once idle; a project that is
//! not registered falls back to its stored status.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use anigen_llm::NovelParser;
use anigen_models::{ProgressSnapshot, ProjectId};
use anigen_storage::{ContextRepository, StorageError};

use crate::config::RegistryConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::GenerationPipeline;

/// Process-wide map of project id to live pipeline.
pub struct PipelineRegistry {
    pipelines: RwLock<HashMap<ProjectId, Arc<GenerationPipeline>>>,
    repository: ContextRepository,
    parser: Arc<dyn NovelParser>,
    config: RegistryConfig,
}

impl PipelineRegistry {
    pub fn new(
        repository: ContextRepository,
        parser: Arc<dyn NovelParser>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            pipelines: RwLock::new(HashMap::new()),
            repository,
            parser,
            config,
        }
    }

    pub fn repository(&self) -> &ContextRepository {
        &self.repository
    }

    /// Create and register a pipeline for a new project.
    pub async fn create(&self) -> Arc<GenerationPipeline> {
        let pipeline = Arc::new(GenerationPipeline::new(
            &self.repository,
            Arc::clone(&self.parser),
            None,
        ));
        self.insert(Arc::clone(&pipeline)).await;
        pipeline
    }

    /// Live pipeline for `project_id`, or a new one bound to the existing
    /// project.
    pub async fn get_or_create(&self, project_id: &ProjectId) -> Arc<GenerationPipeline> {
        let mut pipelines = self.pipelines.write().await;
        let pipeline = pipelines.entry(project_id.clone()).or_insert_with(|| {
            debug!(project_id = %project_id, "Registering pipeline for existing project");
            Arc::new(GenerationPipeline::new(
                &self.repository,
                Arc::clone(&self.parser),
                Some(project_id.clone()),
            ))
        });
        pipeline.touch();
        Arc::clone(pipeline)
    }

    pub async fn insert(&self, pipeline: Arc<GenerationPipeline>) {
        let project_id = pipeline.project_id().clone();
        self.pipelines.write().await.insert(project_id, pipeline);
    }

    pub async fn get(&self, project_id: &ProjectId) -> Option<Arc<GenerationPipeline>> {
        let pipelines = self.pipelines.read().await;
        pipelines.get(project_id).map(|pipeline| {
            pipeline.touch();
            Arc::clone(pipeline)
        })
    }

    pub async fn remove(&self, project_id: &ProjectId) -> Option<Arc<GenerationPipeline>> {
        self.pipelines.write().await.remove(project_id)
    }

    pub async fn len(&self) -> usize {
        self.pipelines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Progress from the live pipeline, else derived from the stored context.
    pub async fn progress(&self, project_id: &ProjectId) -> PipelineResult<ProgressSnapshot> {
        if let Some(pipeline) = self.get(project_id).await {
            return Ok(pipeline.progress());
        }

        let context = self.repository.store(project_id.clone()).load().await?;
        Ok(ProgressSnapshot::from_context(project_id, &context))
    }

    /// Like [`progress`](Self::progress), but a missing project yields the
    /// `not_found` snapshot.
    pub async fn progress_or_not_found(
        &self,
        project_id: &ProjectId,
    ) -> PipelineResult<ProgressSnapshot> {
        match self.progress(project_id).await {
            Err(PipelineError::Storage(StorageError::ProjectNotFound(_))) => {
                Ok(ProgressSnapshot::not_found(project_id.as_str()))
            }
            other => other,
        }
    }

    /// Drop pipelines that are idle past their TTL. Running pipelines are kept.
    pub async fn evict_idle(&self) -> usize {
        let mut pipelines = self.pipelines.write().await;
        let before = pipelines.len();

        pipelines.retain(|_, pipeline| {
            if pipeline.is_running() {
                return true;
            }
            let ttl = if pipeline.progress().is_terminal() {
                self.config.terminal_ttl
            } else {
                self.config.idle_ttl
            };
            pipeline.idle_for() < ttl
        });

        let evicted = before - pipelines.len();
        if evicted > 0 {
            info!(evicted, remaining = pipelines.len(), "Evicted idle pipelines");
        }
        evicted
    }

    /// Run eviction and lock pruning every `sweep_interval` until aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Starting pipeline sweeper (interval: {:?})",
                self.config.sweep_interval
            );
            let mut ticker = interval(self.config.sweep_interval);

            loop {
                ticker.tick().await;
                self.evict_idle().await;
                let pruned = self.repository.prune_locks().await;
                if pruned > 0 {
                    debug!(pruned, "Pruned idle project locks");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anigen_models::PipelineStage;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::{sample_novel, StubParser};

    fn registry(dir: &TempDir, config: RegistryConfig) -> PipelineRegistry {
        PipelineRegistry::new(
            ContextRepository::new(dir.path()),
            Arc::new(StubParser::new(sample_novel())),
            config,
        )
    }

    fn ttl_config(idle_ttl: Duration, terminal_ttl: Duration) -> RegistryConfig {
        RegistryConfig {
            idle_ttl,
            terminal_ttl,
            sweep_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_create_registers_pipeline() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, RegistryConfig::default());

        let pipeline = registry.create().await;
        let found = registry.get(pipeline.project_id()).await.unwrap();
        assert!(Arc::ptr_eq(&pipeline, &found));
        assert_eq!(registry.len().await, 1);

        registry.remove(pipeline.project_id()).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_live_instance() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, RegistryConfig::default());
        let id = ProjectId::new();

        let first = registry.get_or_create(&id).await;
        let second = registry.get_or_create(&id).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.project_id(), &id);
    }

    #[tokio::test]
    async fn test_progress_prefers_live_pipeline() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, RegistryConfig::default());
        let pipeline = registry.create().await;
        pipeline.run("text").await.unwrap();

        let progress = registry.progress(pipeline.project_id()).await.unwrap();
        assert_eq!(progress.stage(), Some(PipelineStage::WaitingCharacterConfirmation));
        assert_eq!(progress.progress, 100);
    }

    #[tokio::test]
    async fn test_progress_falls_back_to_store() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, RegistryConfig::default());
        let pipeline = registry.create().await;
        pipeline.run("text").await.unwrap();
        pipeline.continue_after_character_confirmation().await.unwrap();
        registry.remove(pipeline.project_id()).await;

        let progress = registry.progress(pipeline.project_id()).await.unwrap();
        assert_eq!(progress.stage, "completed");
        assert_eq!(progress.progress, 100);
        assert_eq!(progress.task, "");
    }

    #[tokio::test]
    async fn test_progress_for_unknown_project() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, RegistryConfig::default());
        let id = ProjectId::new();

        let err = registry.progress(&id).await.unwrap_err();
        assert!(err.is_not_found());

        let snapshot = registry.progress_or_not_found(&id).await.unwrap();
        assert_eq!(snapshot.stage, "not_found");
        assert_eq!(snapshot.error.as_deref(), Some("Project not found"));
    }

    #[tokio::test]
    async fn test_evict_idle() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, ttl_config(Duration::ZERO, Duration::ZERO));
        registry.create().await;
        registry.create().await;

        assert_eq!(registry.evict_idle().await, 2);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_terminal_pipelines_use_shorter_ttl() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, ttl_config(Duration::from_secs(3600), Duration::ZERO));

        let finished = registry.create().await;
        finished.run("text").await.unwrap();
        finished.continue_after_character_confirmation().await.unwrap();
        let waiting = registry.create().await;
        waiting.run("text").await.unwrap();

        assert_eq!(registry.evict_idle().await, 1);
        assert!(registry.get(finished.project_id()).await.is_none());
        assert!(registry.get(waiting.project_id()).await.is_some());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(registry(&dir, ttl_config(Duration::ZERO, Duration::ZERO)));
        registry.create().await;

        let handle = Arc::clone(&registry).spawn_sweeper();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !registry.is_empty().await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        handle.abort();
    }
}

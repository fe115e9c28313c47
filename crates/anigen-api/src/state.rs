//! Application state.

use std::sync::Arc;

use anigen_llm::{LlmClient, LlmResult, NovelParser};
use anigen_models::ProjectId;
use anigen_pipeline::{PipelineRegistry, RegistryConfig};
use anigen_storage::{ContextRepository, ContextStore, StoreConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub repository: ContextRepository,
    pub pipelines: Arc<PipelineRegistry>,
}

impl AppState {
    pub fn new(
        config: ApiConfig,
        repository: ContextRepository,
        parser: Arc<dyn NovelParser>,
        registry_config: RegistryConfig,
    ) -> Self {
        let pipelines = Arc::new(PipelineRegistry::new(
            repository.clone(),
            parser,
            registry_config,
        ));

        Self {
            config,
            repository,
            pipelines,
        }
    }

    /// Build state from environment variables.
    pub fn from_env(config: ApiConfig) -> LlmResult<Self> {
        let repository = ContextRepository::from_config(&StoreConfig::from_env());
        let parser: Arc<dyn NovelParser> = Arc::new(LlmClient::from_env()?);

        Ok(Self::new(
            config,
            repository,
            parser,
            RegistryConfig::from_env(),
        ))
    }

    pub fn store(&self, project_id: &ProjectId) -> ContextStore {
        self.repository.store(project_id.clone())
    }
}

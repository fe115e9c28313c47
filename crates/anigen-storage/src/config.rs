//! Context store configuration.

use std::path::PathBuf;

/// Default directory for project contexts.
pub const DEFAULT_CONTEXT_DIR: &str = "./context";

/// Context store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding one subdirectory per project
    pub context_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from(DEFAULT_CONTEXT_DIR),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            context_dir: std::env::var("CONTEXT_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTEXT_DIR)),
        }
    }
}

//! Versioned project context storage.
//!
//! This crate provides:
//! - A file-backed store with one current state per project
//! - Append-only history snapshots keyed by version
//! - Rollback that restores a snapshot as a new version
//! - Per-project write serialization

pub mod config;
pub mod error;
mod fs_utils;
pub mod locks;
pub mod store;

pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use locks::ProjectLocks;
pub use store::{ContextRepository, ContextStore};

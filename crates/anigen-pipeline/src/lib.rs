//! Generation pipeline orchestration.
//!
//! This crate provides:
//! - The stage state machine from novel text to finished video
//! - In-memory progress with a broadcast feed per pipeline
//! - A registry of live pipelines with idle eviction
//! - Structured pipeline logging

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use config::RegistryConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::PipelineLogger;
pub use pipeline::GenerationPipeline;
pub use registry::PipelineRegistry;

//! Text-parsing collaborator.
//!
//! Turns raw novel text into characters and scenes by calling an
//! OpenAI-compatible chat-completions endpoint. The pipeline only depends on
//! the [`NovelParser`] trait, so tests can substitute their own parser.

pub mod client;
pub mod error;
pub mod types;

pub use client::{extract_json, LlmClient, LlmConfig, NovelParser};
pub use error::{LlmError, LlmResult};
pub use types::ParsedNovel;

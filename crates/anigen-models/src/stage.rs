//! Pipeline stages.
//!
//! A stage is reflected both in memory (the pipeline's progress snapshot)
//! and durably (the `status` string of the project context).

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// One step of the generation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Pipeline constructed, nothing done yet
    #[default]
    Initializing,
    /// Waiting on the text-parsing collaborator
    ParsingText,
    /// Characters and scenes extracted
    TextParsed,
    /// Context initialized; the user must pick character artwork
    WaitingCharacterConfirmation,
    GeneratingCharacterImages,
    GeneratingKeyframes,
    GeneratingVideos,
    ConcatenatingVideo,
    /// Final video produced
    Completed,
    /// Terminal failure, reachable from any stage
    Error,
}

/// Stages walked after character confirmation, in order.
pub const GENERATION_SEQUENCE: [PipelineStage; 5] = [
    PipelineStage::GeneratingCharacterImages,
    PipelineStage::GeneratingKeyframes,
    PipelineStage::GeneratingVideos,
    PipelineStage::ConcatenatingVideo,
    PipelineStage::Completed,
];

impl PipelineStage {
    /// Get string representation of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Initializing => "initializing",
            PipelineStage::ParsingText => "parsing_text",
            PipelineStage::TextParsed => "text_parsed",
            PipelineStage::WaitingCharacterConfirmation => "waiting_character_confirmation",
            PipelineStage::GeneratingCharacterImages => "generating_character_images",
            PipelineStage::GeneratingKeyframes => "generating_keyframes",
            PipelineStage::GeneratingVideos => "generating_videos",
            PipelineStage::ConcatenatingVideo => "concatenating_video",
            PipelineStage::Completed => "completed",
            PipelineStage::Error => "error",
        }
    }

    /// Fixed progress percentage reported when entering this stage.
    ///
    /// `Error` has no percentage of its own; the pipeline keeps whatever
    /// value was current when the failure happened.
    pub fn progress(&self) -> u8 {
        match self {
            PipelineStage::Initializing => 0,
            PipelineStage::ParsingText => 10,
            PipelineStage::TextParsed => 30,
            PipelineStage::WaitingCharacterConfirmation => 100,
            PipelineStage::GeneratingCharacterImages => 40,
            PipelineStage::GeneratingKeyframes => 60,
            PipelineStage::GeneratingVideos => 80,
            PipelineStage::ConcatenatingVideo => 90,
            PipelineStage::Completed => 100,
            PipelineStage::Error => 0,
        }
    }

    /// Human-readable task line shown alongside the stage.
    pub fn task(&self) -> &'static str {
        match self {
            PipelineStage::Initializing => "",
            PipelineStage::ParsingText => "Parsing novel text with LLM...",
            PipelineStage::TextParsed => "Text parsed successfully",
            PipelineStage::WaitingCharacterConfirmation => "Waiting for character confirmation",
            PipelineStage::GeneratingCharacterImages => "Generating character images...",
            PipelineStage::GeneratingKeyframes => "Generating keyframes...",
            PipelineStage::GeneratingVideos => "Generating videos...",
            PipelineStage::ConcatenatingVideo => "Concatenating final video...",
            PipelineStage::Completed => "Generation completed",
            PipelineStage::Error => "",
        }
    }

    /// Check if this is a terminal stage (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Error)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stage = match s {
            "initializing" => PipelineStage::Initializing,
            "parsing_text" => PipelineStage::ParsingText,
            "text_parsed" => PipelineStage::TextParsed,
            "waiting_character_confirmation" => PipelineStage::WaitingCharacterConfirmation,
            "generating_character_images" => PipelineStage::GeneratingCharacterImages,
            "generating_keyframes" => PipelineStage::GeneratingKeyframes,
            "generating_videos" => PipelineStage::GeneratingVideos,
            "concatenating_video" => PipelineStage::ConcatenatingVideo,
            "completed" => PipelineStage::Completed,
            "error" => PipelineStage::Error,
            other => return Err(ModelError::UnknownStage(other.to_string())),
        };
        Ok(stage)
    }
}

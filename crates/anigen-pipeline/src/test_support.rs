//! Parsers for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Notify;

use anigen_llm::{LlmError, LlmResult, NovelParser, ParsedNovel};
use anigen_models::{Character, Scene};

pub(crate) fn sample_novel() -> ParsedNovel {
    let mut characters = BTreeMap::new();
    characters.insert("小明".to_string(), Character::new("a cheerful student"));

    let mut scene = Scene::new("scene_01", "school gate at dawn");
    scene.characters = vec!["小明".to_string()];

    ParsedNovel {
        characters,
        scenes: vec![scene],
    }
}

/// Returns a fixed result.
#[derive(Default)]
pub(crate) struct StubParser {
    result: ParsedNovel,
}

impl StubParser {
    pub(crate) fn new(result: ParsedNovel) -> Self {
        Self { result }
    }
}

#[async_trait]
impl NovelParser for StubParser {
    async fn parse_novel_to_scenes(&self, _text: &str) -> LlmResult<ParsedNovel> {
        Ok(self.result.clone())
    }
}

pub(crate) struct FailingParser;

#[async_trait]
impl NovelParser for FailingParser {
    async fn parse_novel_to_scenes(&self, _text: &str) -> LlmResult<ParsedNovel> {
        Err(LlmError::RateLimited)
    }
}

/// Blocks inside the parse call until released.
pub(crate) struct BlockingParser {
    called: Notify,
    released: Notify,
}

impl BlockingParser {
    pub(crate) fn new() -> Self {
        Self {
            called: Notify::new(),
            released: Notify::new(),
        }
    }

    pub(crate) async fn wait_until_called(&self) {
        self.called.notified().await;
    }

    pub(crate) fn release(&self) {
        self.released.notify_one();
    }
}

#[async_trait]
impl NovelParser for BlockingParser {
    async fn parse_novel_to_scenes(&self, _text: &str) -> LlmResult<ParsedNovel> {
        self.called.notify_one();
        self.released.notified().await;
        Ok(sample_novel())
    }
}

//! Chat-completions HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::error::{LlmError, LlmResult};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ParsedNovel};

const PARSE_TEMPERATURE: f64 = 0.3;

const PARSE_SYSTEM_PROMPT: &str = r#"You are an anime screenplay analyst. Convert the novel excerpt into a structured anime storyboard.

1. Extract every character with a short description of appearance and personality.
2. Split the story into scenes. Each scene has an id (scene_01, scene_02, ...), a setting (place, time, mood), the characters present, a camera shot (push_in, pull_out, pan, close_up, wide_shot) with a duration in seconds, and optional dialogue per character.

Answer with JSON only, in this shape:
{
  "characters": { "<name>": { "description": "<description>" } },
  "scenes": [
    {
      "id": "scene_01",
      "setting": "<setting>",
      "characters": ["<name>"],
      "camera": { "type": "<shot>", "duration_s": 6 },
      "dialogue": { "<name>": "<line>" }
    }
  ]
}"#;

/// Anything that can turn novel text into characters and scenes.
#[async_trait]
pub trait NovelParser: Send + Sync {
    async fn parse_novel_to_scenes(&self, text: &str) -> LlmResult<ParsedNovel>;
}

/// Configuration for the LLM client.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`)
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Max tokens for novel parsing
    pub max_tokens: u32,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
    /// First backoff delay; doubled on each retry
    pub retry_base_delay: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "deepseek-v3".to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl LlmConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            model: std::env::var("LLM_MODEL").unwrap_or(defaults.model),
            max_tokens: std::env::var("LLM_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_tokens),
            timeout: Duration::from_secs(
                std::env::var("LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("LLM_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: defaults.retry_base_delay,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Client for an OpenAI-compatible chat-completions service.
pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    /// Create a new LLM client.
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::ConfigError("LLM base URL is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> LlmResult<Self> {
        Self::new(LlmConfig::from_env())
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send a chat completion and return the first choice's content.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: u32,
        temperature: f64,
    ) -> LlmResult<String> {
        let url = self.config.completions_url();
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens,
            temperature,
        };

        debug!(model = %request.model, max_tokens, "Sending chat completion to {}", url);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(e))?;
                Self::check_status(response).await
            })
            .await?;

        let body: ChatCompletionResponse = response.json().await?;
        body.first_content()
            .map(str::to_string)
            .ok_or_else(|| LlmError::invalid_response("Response contained no choices"))
    }

    fn map_send_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout(self.config.timeout.as_secs())
        } else {
            LlmError::Network(err)
        }
    }

    async fn check_status(response: reqwest::Response) -> LlmResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(LlmError::RateLimited)
        } else if status.is_server_error() {
            Err(LlmError::ServerError {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(LlmError::RequestFailed(format!(
                "LLM service returned {}: {}",
                status, body
            )))
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> LlmResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = LlmResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        "LLM request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::RequestFailed("Unknown error".to_string())))
    }
}

#[async_trait]
impl NovelParser for LlmClient {
    async fn parse_novel_to_scenes(&self, text: &str) -> LlmResult<ParsedNovel> {
        let messages = vec![
            ChatMessage::system(PARSE_SYSTEM_PROMPT),
            ChatMessage::user(format!("Analyze the following novel text:\n\n{}", text)),
        ];

        let content = self
            .chat_completion(messages, self.config.max_tokens, PARSE_TEMPERATURE)
            .await?;

        let json = extract_json(&content)?;
        let parsed: ParsedNovel = serde_json::from_str(json)?;

        info!(
            characters = parsed.characters.len(),
            scenes = parsed.scenes.len(),
            "Parsed novel text"
        );
        Ok(parsed)
    }
}

/// Slice from the first `{` to the last `}` of a model reply.
pub fn extract_json(content: &str) -> LlmResult<&str> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(&content[start..=end]),
        _ => Err(LlmError::invalid_response(
            "Failed to extract JSON from LLM response",
        )),
    }
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_config(base_url: String) -> LlmConfig {
        LlmConfig {
            base_url,
            api_key: "test-key".to_string(),
            max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })
    }

    #[test]
    fn test_config_defaults() {
        let config = LlmConfig::default();
        assert_eq!(config.model, "deepseek-v3");
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 1), Duration::MAX);
    }

    #[test]
    fn test_completions_url_trims_slash() {
        let config = test_config("http://llm.local/v1/".to_string());
        assert_eq!(config.completions_url(), "http://llm.local/v1/chat/completions");
    }

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let reply = "Sure!\n```json\n{\"characters\": {}, \"scenes\": []}\n```";
        assert_eq!(
            extract_json(reply).unwrap(),
            "{\"characters\": {}, \"scenes\": []}"
        );
    }

    #[test]
    fn test_extract_json_spans_outermost_braces() {
        let reply = r#"{"a": {"b": 1}} trailing {"c": 2}"#;
        assert_eq!(extract_json(reply).unwrap(), reply);
    }

    #[test]
    fn test_extract_json_failure() {
        for reply in ["no json here", "} backwards {", ""] {
            let err = extract_json(reply).unwrap_err();
            assert_eq!(
                err.to_string(),
                "Invalid response: Failed to extract JSON from LLM response"
            );
        }
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = LlmClient::new(test_config(" ".to_string()));
        assert!(matches!(result, Err(LlmError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_parse_novel_to_scenes() {
        let server = MockServer::start().await;
        let reply = r#"Here is the storyboard:
{"characters": {"Xiao Ming": {"description": "a student"}},
 "scenes": [{"id": "scene_01", "setting": "classroom", "characters": ["Xiao Ming"],
             "camera": {"type": "close_up", "duration_s": 4}}]}"#;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek-v3",
                "max_tokens": 4096,
                "temperature": 0.3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(reply)))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri())).unwrap();
        let parsed = client.parse_novel_to_scenes("Xiao Ming walked in.").await.unwrap();

        assert_eq!(parsed.characters["Xiao Ming"].description, "a student");
        assert_eq!(parsed.scenes.len(), 1);
        assert_eq!(parsed.scenes[0].camera.duration_s, 4.0);
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(r#"{"characters": {}, "scenes": []}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri())).unwrap();
        let parsed = client.parse_novel_to_scenes("text").await.unwrap();
        assert_eq!(parsed, ParsedNovel::default());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri())).unwrap();
        let err = client.parse_novel_to_scenes("text").await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri())).unwrap();
        let err = client.parse_novel_to_scenes("text").await.unwrap_err();
        match err {
            LlmError::RequestFailed(msg) => assert!(msg.contains("bad key")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reply_without_json() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion("I cannot help with that.")),
            )
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri())).unwrap();
        let err = client.parse_novel_to_scenes("text").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }
}

pub mod models;
pub mod config;

pub use config::ClaudeConfig;
pub use models::ClaudeModel;

use crate::config::KeyFromEnv;
use crate::core::{ChatMessage, ChatRole, LowLevelClient};
use crate::error::{AIError, ClaudeError};
use crate::streaming::{sse_tokens, SseDialect, TokenStream};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
pub struct ClaudeRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<ClaudeMessage>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: ClaudeMessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ClaudeMessageContent {
    Simple(String),
    Structured(Vec<ClaudeContentBlock>),
}

#[derive(Debug, Serialize)]
pub struct ClaudeContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub cache_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeResponse {
    pub content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeContent {
    #[serde(default)]
    pub text: String,
}

impl ClaudeRequest {
    /// Long turns (typically ones embedding textbook excerpts) are marked
    /// cacheable so follow-up questions reuse them.
    #[must_use]
    pub fn new(messages: &[ChatMessage], config: &ClaudeConfig, stream: bool) -> Self {
        let messages = messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    ChatRole::User => "user",
                    ChatRole::Model => "assistant",
                };
                let content = if config.enable_caching && message.text.len() > config.cache_threshold {
                    ClaudeMessageContent::Structured(vec![ClaudeContentBlock {
                        block_type: "text".to_string(),
                        text: message.text.clone(),
                        cache_control: Some(CacheControl {
                            cache_type: "ephemeral".to_string(),
                        }),
                    }])
                } else {
                    ClaudeMessageContent::Simple(message.text.clone())
                };
                ClaudeMessage { role: role.to_string(), content }
            })
            .collect();

        Self {
            model: config.model.id().to_string(),
            max_tokens: config.max_tokens,
            messages,
            stream,
        }
    }
}

#[derive(Clone)]
pub struct ClaudeClient {
    config: ClaudeConfig,
    client: Client,
}

impl std::fmt::Debug for ClaudeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeClient").field("model", &self.config.model.id()).finish()
    }
}

impl KeyFromEnv for ClaudeClient {
    const KEY_NAME: &'static str = "ANTHROPIC_API_KEY";
}

fn classify_error(status: u16, body: String) -> AIError {
    AIError::Claude(match status {
        429 => ClaudeError::RateLimit,
        401 | 403 => ClaudeError::Authentication,
        _ => ClaudeError::Api(body),
    })
}

fn http_error(message: String) -> AIError {
    AIError::Claude(ClaudeError::Http(message))
}

impl ClaudeClient {
    pub fn new(config: ClaudeConfig) -> Self {
        info!(model = %config.model.id(), "Creating new Claude client");
        Self { config, client: Client::new() }
    }

    /// Client keyed from `ANTHROPIC_API_KEY` (asking on the terminal if unset),
    /// model from `STUDY_CLAUDE_MODEL`.
    pub fn from_env() -> Result<Self, AIError> {
        let api_key = Self::find_key_with_user().ok_or(ClaudeError::Authentication)?;
        Ok(Self::new(ClaudeConfig::from_key(api_key)))
    }

    fn post(&self, request: &ClaudeRequest) -> reqwest::RequestBuilder {
        self.client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
    }

    #[instrument(skip(self, messages), fields(turns = messages.len(), model = %self.config.model.id()))]
    async fn call_api(&self, messages: &[ChatMessage]) -> Result<String, AIError> {
        let request = ClaudeRequest::new(messages, &self.config, false);

        debug!("Sending request to Claude API");
        let response = self.post(&request).send().await.map_err(|e| {
            error!(error = %e, "HTTP request failed");
            http_error(e.to_string())
        })?;

        let status = response.status();
        debug!(status = %status, "Received response from Claude API");

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = %status, error = %error_text, "Claude API error");
            return Err(classify_error(status.as_u16(), error_text));
        }

        let claude_response: ClaudeResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse Claude response JSON");
            http_error(e.to_string())
        })?;

        let text: String = claude_response.content.into_iter().map(|c| c.text).collect();
        if text.is_empty() {
            error!("No content in Claude response");
            return Err(AIError::Claude(ClaudeError::Api("No content in response".to_string())));
        }
        info!(response_len = text.len(), "Successfully received Claude response");
        Ok(text)
    }
}

#[async_trait]
impl LowLevelClient for ClaudeClient {
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError> {
        self.call_api(&[ChatMessage::user(prompt)]).await
    }

    fn clone_box(&self) -> Box<dyn LowLevelClient> {
        Box::new(self.clone())
    }

    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.call_api(&messages).await
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>) -> Option<TokenStream> {
        let request = ClaudeRequest::new(&messages, &self.config, true);
        let bytes = crate::clients::streaming_body(self.post(&request), classify_error, http_error);
        Some(sse_tokens(bytes, SseDialect::Anthropic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_turns_are_cacheable_and_roles_mapped() {
        let config = ClaudeConfig::anthropic("k".into(), ClaudeModel::Haiku35);
        let long = "x".repeat(config.cache_threshold + 1);
        let request = ClaudeRequest::new(&[ChatMessage::user(long), ChatMessage::model("ok")], &config, false);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["content"], "ok");
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(classify_error(429, String::new()).is_quota_exceeded());
        assert!(matches!(classify_error(401, String::new()), AIError::Claude(ClaudeError::Authentication)));
    }
}

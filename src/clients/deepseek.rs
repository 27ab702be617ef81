use crate::config::KeyFromEnv;
use crate::core::{ChatMessage, ChatRole, LowLevelClient};
use crate::error::{AIError, DeepSeekError};
use crate::streaming::{sse_tokens, SseDialect, TokenStream};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn, error, debug, instrument};

const COMPLETIONS_URL: &str = "https://api.deepseek.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct DeepSeekRequest {
    model: String,
    messages: Vec<DeepSeekMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct DeepSeekMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct DeepSeekResponse {
    choices: Vec<DeepSeekChoice>,
}

#[derive(Debug, Deserialize)]
struct DeepSeekChoice {
    message: DeepSeekResponseMessage,
}

#[derive(Debug, Deserialize)]
struct DeepSeekResponseMessage {
    content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeepSeekModel {
    #[default]
    Chat,
    Reasoner,
    Override(String),
}

impl DeepSeekModel {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Chat => "deepseek-chat",
            Self::Reasoner => "deepseek-reasoner",
            Self::Override(s) => s.as_str(),
        }
    }
}

/// Configuration for DeepSeek client
#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub api_key: String,
    pub model: DeepSeekModel,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DeepSeekModel::default(),
            max_tokens: 4096,
            temperature: 0.3,
        }
    }
}

#[derive(Clone)]
pub struct DeepSeekClient {
    config: DeepSeekConfig,
    client: Client,
}

impl std::fmt::Debug for DeepSeekClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepSeekClient").field("model", &self.config.model.id()).finish()
    }
}

impl KeyFromEnv for DeepSeekClient {
    const KEY_NAME: &'static str = "DEEPSEEK_API_KEY";
}

fn classify_error(status: u16, body: String) -> AIError {
    AIError::DeepSeek(match status {
        429 => DeepSeekError::RateLimit,
        401 => DeepSeekError::Authentication,
        _ => DeepSeekError::Api(body),
    })
}

fn http_error(message: String) -> AIError {
    AIError::DeepSeek(DeepSeekError::Http(message))
}

impl DeepSeekClient {
    /// Create a new DeepSeek client with full configuration
    pub fn new(config: DeepSeekConfig) -> Self {
        info!(model = %config.model.id(), "Creating new DeepSeek client");
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Client keyed from `DEEPSEEK_API_KEY`, asking on the terminal if unset.
    pub fn from_env() -> Result<Self, AIError> {
        let api_key = Self::find_key_with_user().ok_or(DeepSeekError::Authentication)?;
        Ok(Self::new(DeepSeekConfig { api_key, ..DeepSeekConfig::default() }))
    }

    fn build_request(&self, messages: &[ChatMessage], stream: bool) -> DeepSeekRequest {
        DeepSeekRequest {
            model: self.config.model.id().to_string(),
            messages: messages
                .iter()
                .map(|m| DeepSeekMessage {
                    role: match m.role {
                        ChatRole::User => "user",
                        ChatRole::Model => "assistant",
                    }
                    .to_string(),
                    content: m.text.clone(),
                })
                .collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        }
    }

    fn post(&self, request: &DeepSeekRequest) -> reqwest::RequestBuilder {
        self.client
            .post(COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
    }

    #[instrument(skip(self, messages), fields(turns = messages.len(), model = %self.config.model.id()))]
    async fn call_api(&self, messages: &[ChatMessage]) -> Result<String, AIError> {
        let request = self.build_request(messages, false);

        debug!("Sending request to DeepSeek API");
        let response = self.post(&request).send().await.map_err(|e| {
            error!(error = %e, "HTTP request failed");
            http_error(e.to_string())
        })?;

        let status = response.status();
        debug!(status = %status, "Received response from DeepSeek API");

        if !status.is_success() {
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(status = %status, error = %error_text, "DeepSeek API error");
            return Err(classify_error(status.as_u16(), error_text));
        }

        let deepseek_response: DeepSeekResponse = response
            .json()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to parse DeepSeek response JSON");
                http_error(e.to_string())
            })?;

        debug!(choices_count = deepseek_response.choices.len(), "Parsed DeepSeek response");

        let result = deepseek_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| AIError::DeepSeek(DeepSeekError::Api("No choices in response".to_string())));

        match &result {
            Ok(text) => info!(response_len = text.len(), "Successfully received DeepSeek response"),
            Err(e) => error!(error = %e, "Failed to extract content from DeepSeek response"),
        }

        result
    }
}

#[async_trait]
impl LowLevelClient for DeepSeekClient {
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
        let request = self.build_request(&messages, true);
        let bytes = crate::clients::streaming_body(self.post(&request), classify_error, http_error);
        Some(sse_tokens(bytes, SseDialect::OpenAi))
    }
}

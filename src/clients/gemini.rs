pub mod models;

pub use models::GeminiModel;

use crate::config::KeyFromEnv;
use crate::core::{ChatMessage, ChatRole, LowLevelClient};
use crate::error::{mentions_quota, AIError, GeminiError};
use crate::streaming::{sse_tokens, SseDialect, TokenStream};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    google_search: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Configuration for the Gemini client
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: GeminiModel,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: GeminiModel::default(),
            max_output_tokens: 8192,
            temperature: 0.7,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl GeminiConfig {
    #[must_use]
    pub fn with_model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.config.model.id())
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl KeyFromEnv for GeminiClient {
    const KEY_NAME: &'static str = "GEMINI_API_KEY";
}

impl GeminiClient {
    /// Create a new Gemini client with full configuration
    pub fn new(config: GeminiConfig) -> Self {
        info!(model = %config.model.id(), "Creating new Gemini client");
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Client keyed from `GEMINI_API_KEY`, asking on the terminal if unset.
    pub fn from_env() -> Result<Self, AIError> {
        let api_key = Self::find_key_with_user().ok_or(GeminiError::Authentication)?;
        Ok(Self::new(GeminiConfig { api_key, ..GeminiConfig::default() }))
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.config.base_url, self.config.model.id(), method)
    }

    fn build_request(&self, messages: &[ChatMessage], with_search: bool) -> GeminiRequest {
        GeminiRequest {
            contents: messages.iter().map(to_content).collect(),
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
            tools: if with_search {
                vec![GeminiTool { google_search: serde_json::json!({}) }]
            } else {
                Vec::new()
            },
        }
    }

    #[instrument(skip(self, messages), fields(turns = messages.len(), model = %self.config.model.id()))]
    async fn generate(&self, messages: &[ChatMessage], with_search: bool) -> Result<String, AIError> {
        let request = self.build_request(messages, with_search);

        debug!(with_search, "Sending request to Gemini API");
        let response = self
            .client
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP request failed");
                AIError::Gemini(GeminiError::Http(e.to_string()))
            })?;

        let status = response.status();
        debug!(status = %status, "Received response from Gemini API");

        if !status.is_success() {
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let err = classify_error(status.as_u16(), &error_text);
            match &err {
                GeminiError::QuotaExceeded(_) | GeminiError::RateLimit => warn!(error = %err, "Gemini quota or rate limit hit"),
                _ => error!(status = %status, error = %err, "Gemini API error"),
            }
            return Err(err.into());
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to parse Gemini response JSON");
                AIError::Gemini(GeminiError::Http(e.to_string()))
            })?;

        let result = response_text(gemini_response, with_search);
        match &result {
            Ok(text) => info!(response_len = text.len(), "Successfully received Gemini response"),
            Err(e) => error!(error = %e, "Failed to extract content from Gemini response"),
        }
        result.map_err(AIError::from)
    }
}

fn to_content(message: &ChatMessage) -> GeminiContent {
    let role = match message.role {
        ChatRole::User => "user",
        ChatRole::Model => "model",
    };
    GeminiContent {
        role: Some(role.to_string()),
        parts: vec![GeminiPart { text: Some(message.text.clone()) }],
    }
}

/// Map a non-success status and body to a typed error.
fn classify_error(status: u16, body: &str) -> GeminiError {
    let parsed = serde_json::from_str::<GeminiErrorEnvelope>(body).ok();
    let (message, api_status) = match &parsed {
        Some(env) => (env.error.message.clone(), env.error.status.as_str()),
        None => (body.to_string(), ""),
    };

    if api_status == "RESOURCE_EXHAUSTED" || (status == 429 && mentions_quota(&message)) {
        return GeminiError::QuotaExceeded(message);
    }
    match status {
        429 => GeminiError::RateLimit,
        401 | 403 => GeminiError::Authentication,
        // An invalid key is reported as 400 INVALID_ARGUMENT
        400 if message.contains("API key not valid") => GeminiError::Authentication,
        _ => GeminiError::Api(message),
    }
}

/// Concatenate the first candidate's text; grounded answers get their web
/// sources appended as a Markdown list.
fn response_text(response: GeminiResponse, with_search: bool) -> Result<String, GeminiError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(GeminiError::Blocked(reason));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "empty response".to_string());
        return Err(GeminiError::Blocked(reason));
    }

    if !with_search {
        return Ok(text);
    }

    let sources: Vec<String> = candidate
        .grounding_metadata
        .map(|m| m.grounding_chunks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|chunk| chunk.web)
        .filter_map(|web| {
            let uri = web.uri?;
            let title = web.title.unwrap_or_else(|| uri.clone());
            Some(format!("- [{}]({})", title, uri))
        })
        .collect();

    if sources.is_empty() {
        Ok(text)
    } else {
        Ok(format!("{}\n\nSources:\n{}", text, sources.join("\n")))
    }
}

fn stream_error(status: u16, body: String) -> AIError {
    AIError::Gemini(classify_error(status, &body))
}

fn stream_http_error(message: String) -> AIError {
    AIError::Gemini(GeminiError::Http(message))
}

#[async_trait]
impl LowLevelClient for GeminiClient {
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError> {
        self.generate(&[ChatMessage::user(prompt)], false).await
    }

    fn clone_box(&self) -> Box<dyn LowLevelClient> {
        Box::new(self.clone())
    }

    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.generate(&messages, false).await
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>) -> Option<TokenStream> {
        let request = self
            .client
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&self.build_request(&messages, false));
        let bytes = super::streaming_body(request, stream_error, stream_http_error);
        Some(sse_tokens(bytes, SseDialect::Gemini))
    }

    async fn ask_with_search(&self, prompt: String) -> Result<String, AIError> {
        self.generate(&[ChatMessage::user(prompt)], true).await
    }
}

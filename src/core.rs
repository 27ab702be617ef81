//! Core querying API: wraps a low-level model client with retries, resilient
//! JSON extraction, schema-aware prompting, chat and streaming responses.
//!
//! Quick start:
//! - **Plain text**: `QueryResolver::ask_text()` for summaries, answers and plans
//! - **Structured**: `QueryResolver::query<T>()` for schema-guided queries with mixed content
//! - **Chat**: `QueryResolver::chat()` / `QueryResolver::stream_chat()` for the tutor

use crate::error::{AIError, QueryResolverError};
use crate::interceptors::Interceptor;
use crate::streaming::{build_parsed_stream, tokens_from_text, StreamItem, TextContent, TokenStream};
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Who said a line of a chat transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

/// One turn of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }
}

/// Render a transcript as a single prompt, for backends without native chat.
pub fn flatten_transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let speaker = match message.role {
            ChatRole::User => "Student",
            ChatRole::Model => "Tutor",
        };
        prompt.push_str(speaker);
        prompt.push_str(": ");
        prompt.push_str(&message.text);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Tutor:");
    prompt
}

/// A single item in an LLM response - either structured data or explanatory text
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseItem<T> {
    /// Structured data that was successfully parsed from JSON
    Data {
        /// The parsed structured data
        data: T,
        /// The JSON text of the data, re-serialized
        original_text: String,
    },
    /// Explanatory text content from the LLM
    Text(TextContent),
}

/// Complete LLM response with mixed content (text + structured data)
#[derive(Debug, Clone)]
pub struct ParsedResponse<T> {
    /// All items in order (text and data)
    pub items: Vec<ResponseItem<T>>,
}

impl<T: Serialize + Clone> ParsedResponse<T> {
    /// Get only the structured data items
    pub fn data_only(&self) -> Vec<&T> {
        self.items.iter().filter_map(|item| match item {
            ResponseItem::Data { data, .. } => Some(data),
            ResponseItem::Text(_) => None,
        }).collect()
    }

    /// Get the complete text content (includes text around parsed JSON)
    pub fn text_content(&self) -> String {
        let mut result = String::new();
        for item in &self.items {
            let piece = match item {
                ResponseItem::Text(text) => &text.text,
                ResponseItem::Data { original_text, .. } => original_text,
            };
            if !result.is_empty() { result.push(' '); }
            result.push_str(piece);
        }
        result
    }

    /// Check if any data was extracted
    pub fn has_data(&self) -> bool {
        self.items.iter().any(|item| matches!(item, ResponseItem::Data { .. }))
    }

    /// Get count of data items found
    pub fn data_count(&self) -> usize {
        self.data_only().len()
    }

    fn from_stream_items(stream_items: Vec<StreamItem<T>>) -> Self {
        let items = stream_items.into_iter().map(|item| match item {
            StreamItem::Data(data) => {
                let original_text = serde_json::to_string(&data)
                    .unwrap_or_else(|_| "[serialization failed]".to_string());
                ResponseItem::Data { data, original_text }
            }
            StreamItem::Text(text) => ResponseItem::Text(text),
        }).collect();

        Self { items }
    }
}

/// Low-level model client abstraction.
///
/// Implementors provide `ask_raw`, which executes a prompt and returns the raw
/// model text. Chat, streaming and search-grounded calls have defaults built on
/// top of it so a minimal backend only needs the one method.
#[async_trait]
pub trait LowLevelClient: Send + Sync + Debug {
    /// The only method that implementations must provide
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError>;

    /// Clone this client into a boxed trait object
    fn clone_box(&self) -> Box<dyn LowLevelClient>;

    /// Multi-turn chat. Default flattens the transcript into one prompt.
    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.ask_raw(flatten_transcript(&messages)).await
    }

    /// Optional: a token stream for a chat transcript. `None` means the
    /// backend cannot stream and callers should use `chat_raw`.
    fn stream_chat(&self, _messages: Vec<ChatMessage>) -> Option<TokenStream> { None }

    /// A prompt answered with live web search. Default has no search and
    /// answers from the model's own knowledge.
    async fn ask_with_search(&self, prompt: String) -> Result<String, AIError> {
        self.ask_raw(prompt).await
    }
}

impl Clone for Box<dyn LowLevelClient> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[async_trait]
impl LowLevelClient for Box<dyn LowLevelClient> {
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError> {
        self.as_ref().ask_raw(prompt).await
    }

    fn clone_box(&self) -> Box<dyn LowLevelClient> {
        self.as_ref().clone_box()
    }

    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.as_ref().chat_raw(messages).await
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>) -> Option<TokenStream> {
        self.as_ref().stream_chat(messages)
    }

    async fn ask_with_search(&self, prompt: String) -> Result<String, AIError> {
        self.as_ref().ask_with_search(prompt).await
    }
}


#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: HashMap<String, usize>,
    pub default_max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let mut max_retries = HashMap::new();
        max_retries.insert("api_error".to_string(), 1);
        max_retries.insert("http_error".to_string(), 1);

        Self {
            max_retries,
            default_max_retries: 1,
        }
    }
}

impl RetryConfig {
    /// No retries at all; every failure is reported immediately.
    pub fn none() -> Self {
        Self { max_retries: HashMap::new(), default_max_retries: 0 }
    }

    pub fn retries_for(&self, category: &str) -> usize {
        self.max_retries.get(category).copied().unwrap_or(self.default_max_retries)
    }
}


/// Query resolver that wraps a LowLevelClient and provides all generic methods.
#[derive(Clone)]
pub struct QueryResolver<C: LowLevelClient> {
    client: C,
    config: RetryConfig,
    interceptor: Option<Arc<dyn Interceptor>>,
}

impl<C: LowLevelClient> Debug for QueryResolver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResolver")
            .field("client", &self.client)
            .field("config", &self.config)
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

enum Call {
    Ask(String),
    Search(String),
    Chat(Vec<ChatMessage>),
}

impl Call {
    fn transcript_prompt(&self) -> String {
        match self {
            Call::Ask(prompt) | Call::Search(prompt) => prompt.clone(),
            Call::Chat(messages) => flatten_transcript(messages),
        }
    }
}

impl<C: LowLevelClient> QueryResolver<C> {
    pub fn new(client: C, config: RetryConfig) -> Self {
        info!(default_max_retries = config.default_max_retries, "Creating new QueryResolver");
        Self { client, config, interceptor: None }
    }

    /// Record every prompt/response pair through `interceptor`.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a reference to the retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Plain-text query: the model's reply, trimmed.
    #[instrument(target = "study_companion::resolver", skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn ask_text(&self, prompt: String) -> Result<String, QueryResolverError> {
        let raw = self.call_with_retry(Call::Ask(prompt)).await?;
        Ok(raw.trim().to_string())
    }

    /// Prompt answered with web search where the backend supports it.
    #[instrument(target = "study_companion::resolver", skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn search(&self, prompt: String) -> Result<String, QueryResolverError> {
        let raw = self.call_with_retry(Call::Search(prompt)).await?;
        Ok(raw.trim().to_string())
    }

    /// Multi-turn chat reply.
    #[instrument(target = "study_companion::resolver", skip(self, messages), fields(turns = messages.len()))]
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, QueryResolverError> {
        let raw = self.call_with_retry(Call::Chat(messages)).await?;
        Ok(raw.trim().to_string())
    }

    /// Streaming chat reply. Falls back to one non-streamed reply delivered
    /// as a single token when the client cannot stream.
    #[instrument(target = "study_companion::resolver", skip(self, messages), fields(turns = messages.len()))]
    pub async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<TokenStream, QueryResolverError> {
        if let Some(stream) = self.client.stream_chat(messages.clone()) {
            info!("Successfully initiated streaming response");
            return Ok(stream);
        }
        debug!("Client does not support streaming; using a single chat call");
        let reply = self.chat(messages).await?;
        Ok(tokens_from_text(vec![reply]))
    }

    /// Query expecting mixed content (text + structured data)
    ///
    /// Returns exactly what LLMs actually produce: a mix of explanatory text and
    /// structured data, preserving order and context.
    #[instrument(target = "study_companion::resolver", skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn query_mixed<T>(&self, prompt: String) -> Result<ParsedResponse<T>, QueryResolverError>
    where
        T: DeserializeOwned + Send + Debug + Serialize + Clone,
    {
        info!(prompt_len = prompt.len(), "Starting mixed content query");

        let raw_response = self.call_with_retry(Call::Ask(prompt)).await?;
        let stream_items = build_parsed_stream::<T>(&raw_response);
        let response = ParsedResponse::from_stream_items(stream_items);

        info!(data_count = response.data_count(), text_length = response.text_content().len(),
              "Mixed content query completed");

        Ok(response)
    }

    /// Query with automatic JSON Schema guidance - the main recommended method
    #[instrument(target = "study_companion::resolver", skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn query<T>(&self, prompt: String) -> Result<ParsedResponse<T>, QueryResolverError>
    where
        T: DeserializeOwned + JsonSchema + Send + Debug + Serialize + Clone,
    {
        let schema_prompt = add_schema_guidance::<Vec<T>>(prompt);
        self.query_mixed(schema_prompt).await
    }

    async fn call_with_retry(&self, call: Call) -> Result<String, QueryResolverError> {
        let mut attempt = 0;

        loop {
            debug!(attempt = attempt + 1, "Making API call");

            let result = match &call {
                Call::Ask(prompt) => self.client.ask_raw(prompt.clone()).await,
                Call::Search(prompt) => self.client.ask_with_search(prompt.clone()).await,
                Call::Chat(messages) => self.client.chat_raw(messages.clone()).await,
            };

            match result {
                Ok(response) => {
                    debug!(response_len = response.len(), "Received API response");
                    self.record(&call, &response).await;
                    return Ok(response);
                }
                Err(ai_error) => {
                    let max_retries = self.config.retries_for(ai_error.retry_category());
                    warn!(error = %ai_error, attempt = attempt + 1, "API call failed");

                    if ai_error.is_permanent() {
                        return Err(QueryResolverError::Ai(ai_error));
                    }
                    if attempt >= max_retries {
                        error!(error = %ai_error, max_retries, "Max retries exceeded");
                        return Err(QueryResolverError::Ai(ai_error));
                    }

                    attempt += 1;
                }
            }
        }
    }

    async fn record(&self, call: &Call, response: &str) {
        if let Some(interceptor) = &self.interceptor {
            if let Err(e) = interceptor.save(&call.transcript_prompt(), response).await {
                warn!(error = %e, "Failed to write transcript");
            }
        }
    }
}

/// Add JSON schema guidance to a prompt
pub fn add_schema_guidance<T>(prompt: String) -> String
where
    T: JsonSchema,
{
    let schema = schema_for!(T);
    let schema_json = serde_json::to_string_pretty(&schema)
        .unwrap_or_else(|_| "Schema serialization failed".to_string());

    format!(
        "{}\n\n## Response Format\nPlease include valid JSON matching this schema somewhere in your response:\n```json\n{}\n```",
        prompt, schema_json
    )
}

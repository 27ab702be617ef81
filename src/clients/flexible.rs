use crate::core::{ChatMessage, LowLevelClient};
use crate::error::AIError;
use crate::streaming::TokenStream;
use async_trait::async_trait;
use std::env;
use std::fmt;
use std::sync::Arc;

use super::gemini::GeminiClient;
use super::mock::{MockClient, MockHandle, MockResponse};


/// Backend selected at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientType {
    Gemini,
    Claude,
    #[value(name = "deepseek")]
    DeepSeek,
    Mock,
}

/// API key variables, in the order backends are preferred.
pub const API_KEY_VARS: [(ClientType, &str); 3] = [
    (ClientType::Gemini, "GEMINI_API_KEY"),
    (ClientType::Claude, "ANTHROPIC_API_KEY"),
    (ClientType::DeepSeek, "DEEPSEEK_API_KEY"),
];

fn key_available(name: &str) -> bool {
    env::var(name).is_ok()
        || std::fs::read_to_string(".env").map_or(false, |content| content.contains(name))
}

impl Default for ClientType {
    /// First backend with an API key in the environment or `.env`, else Mock
    fn default() -> Self {
        API_KEY_VARS
            .iter()
            .find(|(kind, var)| kind.is_compiled_in() && key_available(var))
            .map_or(Self::Mock, |(kind, _)| *kind)
    }
}

impl std::str::FromStr for ClientType {
    type Err = String;

    /// Parse client type from string (case insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "claude" => Ok(Self::Claude),
            "deepseek" => Ok(Self::DeepSeek),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown client type: '{}'. Supported: gemini, claude, deepseek, mock", s)),
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientType::Gemini => write!(f, "Gemini"),
            ClientType::Claude => write!(f, "Claude"),
            ClientType::DeepSeek => write!(f, "DeepSeek"),
            ClientType::Mock => write!(f, "Mock"),
        }
    }
}

impl ClientType {
    fn is_compiled_in(self) -> bool {
        match self {
            ClientType::Claude => cfg!(feature = "anthropic"),
            ClientType::DeepSeek => cfg!(feature = "deepseek"),
            ClientType::Gemini | ClientType::Mock => true,
        }
    }

    /// Startup warning for the unscripted mock backend.
    pub fn offline_notice() -> String {
        let vars: Vec<&str> = API_KEY_VARS
            .iter()
            .filter(|(kind, _)| kind.is_compiled_in())
            .map(|(_, var)| *var)
            .collect();
        format!(
            "No API key found. Set {} in the environment or .env. \
             Running on the offline mock backend, which has no replies, so every activity will fail.",
            vars.join(" or ")
        )
    }

    /// Build the client, reading its API key (prompting if needed).
    pub fn build(self) -> Result<Box<dyn LowLevelClient>, AIError> {
        match self {
            ClientType::Gemini => Ok(Box::new(GeminiClient::from_env()?)),
            ClientType::Claude => claude_client(),
            ClientType::DeepSeek => deepseek_client(),
            ClientType::Mock => {
                // Nobody holds the handle, so every call reports an empty script
                let (client, _handle) = MockClient::new();
                Ok(Box::new(client))
            }
        }
    }
}

#[cfg(feature = "anthropic")]
fn claude_client() -> Result<Box<dyn LowLevelClient>, AIError> {
    Ok(Box::new(super::claude::ClaudeClient::from_env()?))
}

#[cfg(not(feature = "anthropic"))]
fn claude_client() -> Result<Box<dyn LowLevelClient>, AIError> {
    Err(AIError::Mock("built without the `anthropic` feature".to_string()))
}

#[cfg(feature = "deepseek")]
fn deepseek_client() -> Result<Box<dyn LowLevelClient>, AIError> {
    Ok(Box::new(super::deepseek::DeepSeekClient::from_env()?))
}

#[cfg(not(feature = "deepseek"))]
fn deepseek_client() -> Result<Box<dyn LowLevelClient>, AIError> {
    Err(AIError::Mock("built without the `deepseek` feature".to_string()))
}


/// Client chosen at runtime, usable wherever a concrete client type is expected
#[derive(Debug)]
pub struct FlexibleClient {
    inner: Box<dyn LowLevelClient>,
    kind: ClientType,
}

impl FlexibleClient {
    /// Wrap an already-built client
    pub fn new(client: Box<dyn LowLevelClient>, kind: ClientType) -> Self {
        Self { inner: client, kind }
    }

    /// Build the client for `kind`
    pub fn from_type(kind: ClientType) -> Result<Self, AIError> {
        Ok(Self::new(kind.build()?, kind))
    }

    /// Create a FlexibleClient mock with predefined responses
    pub fn mock_with_responses(responses: Vec<MockResponse>) -> (Self, Arc<MockHandle>) {
        let (mock_client, handle) = MockClient::with_responses(responses);
        (Self::new(Box::new(mock_client), ClientType::Mock), handle)
    }

    pub fn kind(&self) -> ClientType {
        self.kind
    }
}

impl Clone for FlexibleClient {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_box(),
            kind: self.kind,
        }
    }
}

#[async_trait]
impl LowLevelClient for FlexibleClient {
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError> {
        self.inner.ask_raw(prompt).await
    }

    fn clone_box(&self) -> Box<dyn LowLevelClient> {
        Box::new(self.clone())
    }

    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.inner.chat_raw(messages).await
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>) -> Option<TokenStream> {
        self.inner.stream_chat(messages)
    }

    async fn ask_with_search(&self, prompt: String) -> Result<String, AIError> {
        self.inner.ask_with_search(prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_names() {
        assert_eq!("GEMINI".parse::<ClientType>(), Ok(ClientType::Gemini));
        assert_eq!("deepseek".parse::<ClientType>(), Ok(ClientType::DeepSeek));
        assert!("gpt".parse::<ClientType>().is_err());
    }

    #[test]
    fn offline_notice_names_the_missing_keys() {
        let notice = ClientType::offline_notice();
        assert!(notice.contains("GEMINI_API_KEY"));
        assert_eq!(notice.contains("ANTHROPIC_API_KEY"), cfg!(feature = "anthropic"));
        assert_eq!(notice.contains("DEEPSEEK_API_KEY"), cfg!(feature = "deepseek"));
        assert!(notice.contains("mock backend"));
    }

    #[tokio::test]
    async fn mock_handle_controls_the_flexible_client() {
        let (client, handle) = FlexibleClient::mock_with_responses(vec![MockResponse::Success("pong".into())]);
        let copy = client.clone();
        assert_eq!(copy.ask_raw("ping".into()).await.unwrap(), "pong");
        assert_eq!(handle.prompts(), vec!["ping".to_string()]);
        assert_eq!(client.kind(), ClientType::Mock);
    }
}

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{flatten_transcript, ChatMessage, LowLevelClient};
use crate::error::AIError;
use crate::streaming::{tokens_from_text, TokenStream};


/// One scripted reply of the mock backend.
#[derive(Debug)]
pub enum MockResponse {
    Success(String),
    Error(AIError),
}

/// Control side of a `MockClient`: queue replies, inspect prompts.
#[derive(Debug, Default)]
pub struct MockHandle {
    responses: Mutex<VecDeque<MockResponse>>,
    prompts: Mutex<Vec<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockHandle {
    pub fn add_response(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    pub fn add_responses(&self, responses: impl IntoIterator<Item = MockResponse>) {
        lock(&self.responses).extend(responses);
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        lock(&self.prompts).last().cloned()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.prompts).len()
    }

    fn next(&self, prompt: String) -> Result<String, AIError> {
        lock(&self.prompts).push(prompt);
        match lock(&self.responses).pop_front() {
            Some(MockResponse::Success(text)) => Ok(text),
            Some(MockResponse::Error(err)) => Err(err),
            None => Err(AIError::Mock("no scripted response left".to_string())),
        }
    }
}

/// Scripted client for tests and offline runs.
#[derive(Debug, Clone)]
pub struct MockClient {
    handle: Arc<MockHandle>,
}

impl MockClient {
    pub fn new() -> (Self, Arc<MockHandle>) {
        let handle = Arc::new(MockHandle::default());
        (Self { handle: handle.clone() }, handle)
    }

    pub fn with_responses(responses: Vec<MockResponse>) -> (Self, Arc<MockHandle>) {
        let (client, handle) = Self::new();
        handle.add_responses(responses);
        (client, handle)
    }
}

#[async_trait]
impl LowLevelClient for MockClient {
    async fn ask_raw(&self, prompt: String) -> Result<String, AIError> {
        self.handle.next(prompt)
    }

    fn clone_box(&self) -> Box<dyn LowLevelClient> {
        Box::new(self.clone())
    }

    async fn chat_raw(&self, messages: Vec<ChatMessage>) -> Result<String, AIError> {
        self.handle.next(flatten_transcript(&messages))
    }

    fn stream_chat(&self, messages: Vec<ChatMessage>) -> Option<TokenStream> {
        let stream: TokenStream = match self.handle.next(flatten_transcript(&messages)) {
            Ok(text) => tokens_from_text(text.split_inclusive(' ').map(str::to_string).collect()),
            Err(err) => Box::pin(futures_util::stream::iter(vec![Err::<String, AIError>(err)])),
        };
        Some(stream)
    }
}

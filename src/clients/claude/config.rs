use super::models::ClaudeModel;
use std::env;

/// Environment variable that picks the Claude model, e.g. `sonnet` or a full model id.
pub const MODEL_VAR: &str = "STUDY_CLAUDE_MODEL";

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub model: ClaudeModel,
    pub api_key: String,
    /// Exam papers with an answer key run long
    pub max_tokens: u32,
    /// Mark long turns (embedded source material) as cacheable
    pub enable_caching: bool,
    /// Turn length in bytes above which caching applies
    pub cache_threshold: usize,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: ClaudeModel::default(),
            api_key: String::new(),
            max_tokens: 8192,
            enable_caching: true,
            cache_threshold: 4000,
        }
    }
}

impl ClaudeConfig {
    #[must_use]
    pub fn anthropic(api_key: String, model: ClaudeModel) -> Self {
        Self { model, api_key, ..Default::default() }
    }

    /// Config for `api_key` with the model named in `STUDY_CLAUDE_MODEL`, if any.
    #[must_use]
    pub fn from_key(api_key: String) -> Self {
        let model = env::var(MODEL_VAR)
            .ok()
            .map(|name| ClaudeModel::from_name(&name))
            .unwrap_or_default();
        Self::anthropic(api_key, model)
    }
}

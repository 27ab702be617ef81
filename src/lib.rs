pub mod clients;
pub mod config;
pub mod core;
pub mod error;
pub mod interceptors;
pub mod json_utils;
pub mod streaming;
pub mod study;

// Convenient re-exports
pub use crate::core::{ChatMessage, LowLevelClient, ParsedResponse, QueryResolver, ResponseItem, RetryConfig};
pub use config::StudyConfig;
pub use error::{AIError, QueryResolverError, StudyError};
pub use json_utils::extract_all;
pub use study::{Screen, StudyAssistant, StudySession, View};

use async_trait::async_trait;
use std::fmt::Debug;

/// Observer for every prompt/response pair that reaches the backend.
#[async_trait]
pub trait Interceptor: Send + Sync + Debug {
    async fn save(&self, prompt: &str, response: &str) -> std::io::Result<()>;
}

pub mod file;
pub use file::FileInterceptor;

pub mod gemini;
#[cfg(feature = "anthropic")]
pub mod claude;
#[cfg(feature = "deepseek")]
pub mod deepseek;
pub mod flexible;
pub mod mock;

pub use gemini::{GeminiClient, GeminiConfig, GeminiModel};
#[cfg(feature = "anthropic")]
pub use claude::{ClaudeClient, ClaudeConfig, ClaudeModel};
#[cfg(feature = "deepseek")]
pub use deepseek::{DeepSeekClient, DeepSeekConfig, DeepSeekModel};
pub use flexible::{ClientType, FlexibleClient};
pub use mock::{MockClient, MockHandle, MockResponse};

use crate::error::AIError;
use crate::streaming::RawByteStream;
use async_stream::stream;
use futures_util::StreamExt;
use tracing::{debug, error};

/// Send `request` lazily on first poll and stream the response body.
///
/// Non-success statuses are turned into one error item by `classify`, which
/// receives the status code and the response body.
pub(crate) fn streaming_body(
    request: reqwest::RequestBuilder,
    classify: fn(u16, String) -> AIError,
    http_error: fn(String) -> AIError,
) -> RawByteStream {
    Box::pin(stream! {
        match request.send().await {
            Err(e) => {
                error!(error = %e, "Streaming HTTP request failed");
                yield Err(http_error(e.to_string()));
            }
            Ok(resp) if !resp.status().is_success() => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                error!(status, error = %body, "Streaming request rejected");
                yield Err(classify(status, body));
            }
            Ok(resp) => {
                debug!(status = %resp.status(), "Streaming response started");
                let mut bytes = resp.bytes_stream();
                while let Some(chunk) = bytes.next().await {
                    match chunk {
                        Ok(b) => {
                            yield Ok(b);
                        }
                        Err(e) => {
                            yield Err(http_error(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
    })
}

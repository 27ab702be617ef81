use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{mentions_quota, AIError, GeminiError};
use crate::json_utils::{deserialize_stream_map, find_json_structures, ParsedOrUnknown};
use async_stream::stream;
use bytes::Bytes;
use futures_core::stream::Stream;
use futures_util::StreamExt;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, instrument, trace};

/// Represents a piece of unstructured text content returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct TextContent {
    /// Plain text content. Downstream systems can render or log this.
    pub text: String,
}

/// An item of a parsed model response: free text or typed data `T`.
#[derive(Debug, Clone)]
pub enum StreamItem<T> {
    /// Free-form text emitted by the model.
    Text(TextContent),
    /// Structured data conforming to the requested schema.
    Data(T),
}

/// Convenience alias describing the full response as an ordered stream.
pub type ParsedStream<T> = Vec<StreamItem<T>>;

/// Boxed stream of raw response bytes from an HTTP body.
pub type RawByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, AIError>> + Send>>;

/// Boxed stream of text tokens from a streaming chat response.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, AIError>> + Send>>;

/// Build a parsed stream (ordered list of Text/Data(T)) from raw text.
///
/// Any JSON structure that deserializes to `T` becomes `StreamItem::Data(T)`.
/// Non-matching JSON and all non-JSON text are preserved as `StreamItem::Text`
/// in order.
#[instrument(target = "study_companion::json", skip(raw), fields(raw_len = raw.len()))]
pub fn build_parsed_stream<T>(raw: &str) -> ParsedStream<T>
where
    T: DeserializeOwned,
{
    let mut items: ParsedStream<T> = Vec::new();
    let mut cursor = 0usize;

    let push_text = |items: &mut ParsedStream<T>, text: &str| {
        if !text.trim().is_empty() {
            items.push(StreamItem::Text(TextContent { text: text.to_string() }));
        }
    };

    for node in find_json_structures(raw) {
        if node.start > cursor {
            push_text(&mut items, &raw[cursor..node.start]);
        }

        let json_slice = node.slice(raw);
        let mapped = deserialize_stream_map::<T>(json_slice);
        if mapped.iter().any(|m| matches!(m, ParsedOrUnknown::Parsed(_))) {
            for item in mapped {
                match item {
                    ParsedOrUnknown::Parsed(v) => items.push(StreamItem::Data(v)),
                    // Unmatched siblings of parsed data stay visible as text
                    ParsedOrUnknown::Unknown(u) => push_text(&mut items, u.slice(json_slice)),
                }
            }
        } else {
            push_text(&mut items, json_slice);
        }

        cursor = node.end + 1;
    }

    if cursor < raw.len() {
        push_text(&mut items, &raw[cursor..]);
    }

    items
}

/// Wire format of a Server-Sent-Events chat stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseDialect {
    /// `choices[0].delta.content`, terminated by `data: [DONE]`
    OpenAi,
    /// `candidates[0].content.parts[*].text`, ends with the body
    Gemini,
    /// `content_block_delta` events carrying `delta.text`, terminated by `message_stop`
    Anthropic,
}

/// What one SSE payload contributed.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Token(String),
    Done,
    Skip,
}

impl SseDialect {
    pub(crate) fn interpret(self, payload: &str) -> Result<SseEvent, AIError> {
        let payload = payload.trim();
        if payload == "[DONE]" {
            return Ok(SseEvent::Done);
        }
        let Ok(v) = serde_json::from_str::<Value>(payload) else {
            trace!(target: "study_companion::sse", payload, "Ignoring non-JSON SSE payload");
            return Ok(SseEvent::Skip);
        };

        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            let status = err.get("status").and_then(Value::as_str).unwrap_or_default();
            if self == SseDialect::Gemini && (status == "RESOURCE_EXHAUSTED" || mentions_quota(&message)) {
                return Err(AIError::Gemini(GeminiError::QuotaExceeded(message)));
            }
            return Err(AIError::Stream(message));
        }

        let token = match self {
            SseDialect::OpenAi => v
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            SseDialect::Gemini => v
                .pointer("/candidates/0/content/parts")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect::<String>()
                }),
            SseDialect::Anthropic => match v.get("type").and_then(Value::as_str) {
                Some("message_stop") => return Ok(SseEvent::Done),
                Some("content_block_delta") => v
                    .pointer("/delta/text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            },
        };

        Ok(match token {
            Some(t) if !t.is_empty() => SseEvent::Token(t),
            _ => SseEvent::Skip,
        })
    }
}

/// Turn an SSE byte stream into a stream of text tokens.
///
/// Events are separated by blank lines; multi-line `data:` fields are joined
/// with newlines. A trailing event without a closing blank line is still
/// delivered.
pub fn sse_tokens(byte_stream: RawByteStream, dialect: SseDialect) -> TokenStream {
    Box::pin(stream! {
        use tokio_util::io::StreamReader;

        let io_stream = byte_stream.map(|res| {
            res.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        });
        let mut lines = BufReader::new(StreamReader::new(io_stream)).lines();
        let mut data = String::new();
        let mut finished = false;

        loop {
            let line = match lines.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    yield Err(recover_ai_error(e));
                    break;
                }
            };
            let at_end = line.is_none();
            let line = line.unwrap_or_default();

            if line.is_empty() {
                if !data.is_empty() {
                    match dialect.interpret(&data) {
                        Ok(SseEvent::Token(token)) => {
                            yield Ok(token);
                        }
                        Ok(SseEvent::Done) => finished = true,
                        Ok(SseEvent::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            break;
                        }
                    }
                    data.clear();
                }
                if at_end || finished {
                    break;
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // `event:`, `id:` and comment lines carry nothing we need
        }
        debug!(target: "study_companion::sse", ?dialect, "SSE stream finished");
    })
}

/// Undo the io::Error wrapping that `StreamReader` needs, keeping the
/// original backend error (and with it quota detection) when there is one.
fn recover_ai_error(err: std::io::Error) -> AIError {
    let message = err.to_string();
    match err.into_inner() {
        Some(inner) => match inner.downcast::<AIError>() {
            Ok(ai) => *ai,
            Err(other) => AIError::Stream(other.to_string()),
        },
        None => AIError::Stream(message),
    }
}

/// A token stream over pre-split pieces of text, for clients without streaming.
pub fn tokens_from_text(pieces: Vec<String>) -> TokenStream {
    Box::pin(futures_util::stream::iter(pieces.into_iter().map(Ok)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Card { front: String, back: String }

    #[test]
    fn parsed_stream_keeps_text_order() {
        let raw = r#"Here you go: {"front":"cell","back":"unit of life"} {"other":1} done"#;
        let items = build_parsed_stream::<Card>(raw);
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[0], StreamItem::Text(t) if t.text.starts_with("Here you go")));
        assert!(matches!(&items[1], StreamItem::Data(c) if c.front == "cell"));
        assert!(matches!(&items[2], StreamItem::Text(t) if t.text == r#"{"other":1}"#));
        assert!(matches!(&items[3], StreamItem::Text(t) if t.text.trim() == "done"));
    }

    #[test]
    fn gemini_payload_joins_parts() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(SseDialect::Gemini.interpret(payload).unwrap(), SseEvent::Token("Hello".into()));
    }

    #[test]
    fn gemini_quota_error_inside_stream() {
        let payload = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = SseDialect::Gemini.interpret(payload).unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn anthropic_events() {
        let delta = r#"{"type":"content_block_delta","delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(SseDialect::Anthropic.interpret(delta).unwrap(), SseEvent::Token("Hi".into()));
        assert_eq!(SseDialect::Anthropic.interpret(r#"{"type":"ping"}"#).unwrap(), SseEvent::Skip);
        assert_eq!(SseDialect::Anthropic.interpret(r#"{"type":"message_stop"}"#).unwrap(), SseEvent::Done);
    }

    #[tokio::test]
    async fn openai_stream_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Photo\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"synthesis\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        // Split mid-line to exercise reassembly across chunks
        let (a, b) = body.split_at(30);
        let chunks: Vec<Result<Bytes, AIError>> = vec![
            Ok(Bytes::from(a.to_string())),
            Ok(Bytes::from(b.to_string())),
        ];
        let raw: RawByteStream = Box::pin(futures_util::stream::iter(chunks));
        let tokens: Vec<String> = sse_tokens(raw, SseDialect::OpenAi)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Photo".to_string(), "synthesis".to_string()]);
    }

    #[tokio::test]
    async fn backend_errors_survive_the_byte_stream() {
        let chunks: Vec<Result<Bytes, AIError>> = vec![
            Ok(Bytes::from("data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"a\"}]}}]}\n\n")),
            Err(AIError::Gemini(GeminiError::QuotaExceeded("per-minute".into()))),
        ];
        let raw: RawByteStream = Box::pin(futures_util::stream::iter(chunks));
        let items: Vec<Result<String, AIError>> = sse_tokens(raw, SseDialect::Gemini).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert!(items[1].as_ref().unwrap_err().is_quota_exceeded());
    }

    #[tokio::test]
    async fn trailing_event_without_blank_line() {
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"end\"}]}}]}";
        let chunks: Vec<Result<Bytes, AIError>> = vec![Ok(Bytes::from(body))];
        let raw: RawByteStream = Box::pin(futures_util::stream::iter(chunks));
        let tokens: Vec<String> = sse_tokens(raw, SseDialect::Gemini)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["end".to_string()]);
    }
}

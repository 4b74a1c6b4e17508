//! Claude provider implementation for TalkAI
//!
//! This module implements the Provider trait against the Anthropic
//! Messages API, supporting one-shot completions and incremental token
//! streams. The streamed variant parses the provider's SSE events and
//! resolves token usage from the `message_start` and `message_delta`
//! events.

use crate::config::{ClaudeConfig, StoreInfo};
use crate::error::{Result, TalkaiError};
use crate::prompts::build_system_prompt;
use crate::providers::{
    context_messages, ChatMessage, ChunkStream, Completion, Provider, StreamEvent,
};
use crate::storage::{ProductCard, StoredMessage};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Default Anthropic API base
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Messages API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude API provider
///
/// Stateless per call aside from the API key; safe to share across
/// concurrent requests. `ClaudeConfig::api_base` may point at a mock
/// server in tests.
pub struct ClaudeProvider {
    client: Client,
    config: ClaudeConfig,
    api_key: String,
}

/// Request structure for the Messages API
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Response structure from the Messages API (non-streaming)
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

/// One decoded SSE payload from the streaming Messages API
///
/// Only the event shapes the pipeline cares about are represented;
/// everything else (pings, content_block_start/stop) maps to `Ignored`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamPayload {
    /// Start of the reply: model id and input-token count
    MessageStart {
        model: Option<String>,
        input_tokens: usize,
    },
    /// One text fragment
    TextDelta(String),
    /// Output-token count, delivered near the end of the stream
    OutputTokens(usize),
    /// Terminal event
    MessageStop,
    /// Provider-reported mid-stream error
    Error(String),
    Ignored,
}

/// Extract the joined `data:` value from one SSE event block
///
/// Returns None for blocks without data (comments, bare `event:` lines).
pub(crate) fn sse_event_data(block: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        }
        // `event:` lines are redundant with the payload's own "type"
        // field; `:` comment lines and anything else are ignored.
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

/// Decode one SSE data payload into a [`StreamPayload`]
pub(crate) fn parse_stream_payload(data: &str) -> StreamPayload {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return StreamPayload::Ignored,
    };

    match value.get("type").and_then(|t| t.as_str()) {
        Some("message_start") => StreamPayload::MessageStart {
            model: value["message"]["model"].as_str().map(str::to_string),
            input_tokens: value["message"]["usage"]["input_tokens"]
                .as_u64()
                .unwrap_or(0) as usize,
        },
        Some("content_block_delta") => {
            if value["delta"]["type"] == "text_delta" {
                StreamPayload::TextDelta(
                    value["delta"]["text"].as_str().unwrap_or_default().to_string(),
                )
            } else {
                StreamPayload::Ignored
            }
        }
        Some("message_delta") => StreamPayload::OutputTokens(
            value["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
        ),
        Some("message_stop") => StreamPayload::MessageStop,
        Some("error") => StreamPayload::Error(
            value["error"]["message"]
                .as_str()
                .unwrap_or("unknown provider error")
                .to_string(),
        ),
        _ => StreamPayload::Ignored,
    }
}

/// Map a non-success Messages API status to a completion error
fn format_claude_api_error(status: reqwest::StatusCode, body: &str) -> TalkaiError {
    let snippet: String = body.chars().take(300).collect();
    TalkaiError::Completion(format!("Claude API returned {}: {}", status, snippet))
}

impl ClaudeProvider {
    /// Create a new Claude provider instance
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no API key is present, and a
    /// completion error if the HTTP client cannot be built.
    pub fn new(config: ClaudeConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| TalkaiError::Config("Claude API key is not configured".to_string()))?;

        // No total-request timeout: it would abort long token streams.
        // The orchestrator enforces the completion deadline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("talkai/0.2.0")
            .build()
            .map_err(|e| {
                TalkaiError::Completion(format!("Failed to create HTTP client: {}", e))
            })?;

        tracing::info!(
            "Initialized Claude provider: model={}, api_base={}",
            config.model,
            config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
        );

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn messages_url(&self) -> String {
        let base = self
            .config
            .api_base
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/');
        format!("{}/v1/messages", base)
    }

    fn build_request(
        &self,
        history: &[StoredMessage],
        store: &StoreInfo,
        products: &[ProductCard],
        stream: bool,
    ) -> MessagesRequest {
        MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: build_system_prompt(store, products),
            messages: context_messages(history),
            stream,
        }
    }

    async fn send(&self, request: &MessagesRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Claude request failed: {}", e);
                TalkaiError::Completion(format!("Claude request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Claude returned error {}: {}", status, error_text);
            return Err(format_claude_api_error(status, &error_text).into());
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
    async fn complete(
        &self,
        history: &[StoredMessage],
        store: &StoreInfo,
        products: &[ProductCard],
    ) -> Result<Completion> {
        let request = self.build_request(history, store, products, false);

        tracing::debug!(
            "Sending Claude request: {} context messages, model {}",
            request.messages.len(),
            request.model
        );

        let response = self.send(&request).await?;

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse Claude response: {}", e);
            TalkaiError::Completion(format!("Failed to parse Claude response: {}", e))
        })?;

        let content = parsed
            .content
            .iter()
            .find(|block| block.block_type == "text")
            .map(|block| block.text.clone())
            .unwrap_or_default();

        tracing::debug!("Claude response received successfully");

        Ok(Completion {
            content,
            model: parsed.model,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
        })
    }

    async fn complete_stream(
        &self,
        history: &[StoredMessage],
        store: &StoreInfo,
        products: &[ProductCard],
    ) -> Result<ChunkStream> {
        let request = self.build_request(history, store, products, true);

        tracing::debug!(
            "Opening Claude stream: {} context messages, model {}",
            request.messages.len(),
            request.model
        );

        let response = self.send(&request).await?;

        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamEvent>>();
        tokio::spawn(pump_message_stream(
            response.bytes_stream(),
            request.model,
            tx,
        ));

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

/// Parse the Messages API SSE byte stream and forward completion events
///
/// Intended to run inside a `tokio::spawn`; consumes the stream until the
/// terminal `message_stop` event, a provider error, or disconnection. The
/// fragments are accumulated so the terminal event carries the full text
/// and the input+output token sum.
pub(crate) async fn pump_message_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>>,
    fallback_model: String,
    tx: mpsc::UnboundedSender<Result<StreamEvent>>,
) {
    // Buffer accumulates raw bytes between `\n\n` boundaries.
    let mut buffer = String::new();
    let mut content = String::new();
    let mut model = fallback_model;
    let mut input_tokens = 0usize;
    let mut output_tokens = 0usize;

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = match chunk_result {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(TalkaiError::Completion(format!(
                    "Claude stream read failed: {}",
                    e
                ))
                .into()));
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(s) => s,
            Err(_) => continue,
        };
        buffer.push_str(text);

        // SSE events are separated by blank lines (`\n\n`).
        while let Some(pos) = buffer.find("\n\n") {
            let event_block = buffer[..pos].to_string();
            buffer = buffer[pos + 2..].to_string();

            let Some(data) = sse_event_data(&event_block) else {
                continue;
            };

            match parse_stream_payload(&data) {
                StreamPayload::MessageStart {
                    model: m,
                    input_tokens: tokens,
                } => {
                    if let Some(m) = m {
                        model = m;
                    }
                    input_tokens = tokens;
                }
                StreamPayload::TextDelta(delta) => {
                    content.push_str(&delta);
                    // A closed receiver means the consumer is gone; keep
                    // accumulating so the terminal event stays coherent
                    // for anyone still listening upstream.
                    let _ = tx.send(Ok(StreamEvent::Delta(delta)));
                }
                StreamPayload::OutputTokens(tokens) => {
                    output_tokens = tokens;
                }
                StreamPayload::MessageStop => {
                    let _ = tx.send(Ok(StreamEvent::Done(Completion {
                        content,
                        model,
                        tokens_used: input_tokens + output_tokens,
                    })));
                    return;
                }
                StreamPayload::Error(message) => {
                    tracing::error!("Claude stream reported error: {}", message);
                    let _ = tx.send(Err(TalkaiError::Completion(message).into()));
                    return;
                }
                StreamPayload::Ignored => {}
            }
        }
    }

    let _ = tx.send(Err(TalkaiError::Completion(
        "Claude stream ended before message_stop".to_string(),
    )
    .into()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewMessage, Sender};
    use chrono::Utc;

    fn provider_with_key() -> ClaudeProvider {
        let config = ClaudeConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        ClaudeProvider::new(config).unwrap()
    }

    fn stored_text(sender: Sender, content: &str) -> StoredMessage {
        let new = NewMessage::text(sender, content);
        StoredMessage {
            id: ulid::Ulid::new().to_string(),
            kind: new.kind,
            content: new.content,
            sender: new.sender,
            timestamp: Utc::now(),
            duration: None,
            file_url: None,
            file_name: None,
            file_size: None,
            product: None,
        }
    }

    #[test]
    fn test_new_without_api_key_fails() {
        let result = ClaudeProvider::new(ClaudeConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_messages_url_default_and_override() {
        let provider = provider_with_key();
        assert_eq!(
            provider.messages_url(),
            "https://api.anthropic.com/v1/messages"
        );

        let config = ClaudeConfig {
            api_key: Some("sk-test".to_string()),
            api_base: Some("http://localhost:9999/".to_string()),
            ..Default::default()
        };
        let provider = ClaudeProvider::new(config).unwrap();
        assert_eq!(provider.messages_url(), "http://localhost:9999/v1/messages");
    }

    #[test]
    fn test_build_request_serialization() {
        let provider = provider_with_key();
        let history = vec![
            stored_text(Sender::User, "What are your store hours?"),
            stored_text(Sender::Assistant, "We're open 9-6 weekdays."),
        ];
        let store = StoreInfo::default();

        let request = provider.build_request(&history, &store, &[], true);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert!(json["system"].as_str().unwrap().contains(&store.name));
    }

    #[test]
    fn test_sse_event_data_extraction() {
        assert_eq!(
            sse_event_data("event: message_stop\ndata: {\"type\":\"message_stop\"}"),
            Some("{\"type\":\"message_stop\"}".to_string())
        );
        assert_eq!(sse_event_data("event: ping"), None);
        assert_eq!(sse_event_data(": comment only"), None);
    }

    #[test]
    fn test_parse_message_start() {
        let payload = parse_stream_payload(
            r#"{"type":"message_start","message":{"model":"claude-3-5-sonnet-20241022","usage":{"input_tokens":42}}}"#,
        );
        assert_eq!(
            payload,
            StreamPayload::MessageStart {
                model: Some("claude-3-5-sonnet-20241022".to_string()),
                input_tokens: 42,
            }
        );
    }

    #[test]
    fn test_parse_text_delta() {
        let payload = parse_stream_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        );
        assert_eq!(payload, StreamPayload::TextDelta("Hello".to_string()));
    }

    #[test]
    fn test_parse_non_text_delta_ignored() {
        let payload = parse_stream_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
        );
        assert_eq!(payload, StreamPayload::Ignored);
    }

    #[test]
    fn test_parse_message_delta_usage() {
        let payload = parse_stream_payload(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":17}}"#,
        );
        assert_eq!(payload, StreamPayload::OutputTokens(17));
    }

    #[test]
    fn test_parse_message_stop_and_error() {
        assert_eq!(
            parse_stream_payload(r#"{"type":"message_stop"}"#),
            StreamPayload::MessageStop
        );
        assert_eq!(
            parse_stream_payload(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#
            ),
            StreamPayload::Error("Overloaded".to_string())
        );
    }

    #[test]
    fn test_parse_ping_and_garbage_ignored() {
        assert_eq!(
            parse_stream_payload(r#"{"type":"ping"}"#),
            StreamPayload::Ignored
        );
        assert_eq!(parse_stream_payload("not json"), StreamPayload::Ignored);
    }

    /// `pump_message_stream` reassembles fragments split across chunks
    #[tokio::test]
    async fn test_pump_message_stream_handles_split_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        // One SSE event split across two network chunks, then the close
        let part1 = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"te";
        let part2 = "xt\":\"Hi\"}}\n\ndata: {\"type\":\"message_stop\"}\n\n";
        let chunks: Vec<reqwest::Result<Bytes>> =
            vec![Ok(Bytes::from(part1)), Ok(Bytes::from(part2))];

        pump_message_stream(
            futures::stream::iter(chunks),
            "fallback-model".to_string(),
            tx,
        )
        .await;

        let first = rx.try_recv().unwrap().unwrap();
        assert!(matches!(first, StreamEvent::Delta(ref t) if t == "Hi"));

        let second = rx.try_recv().unwrap().unwrap();
        match second {
            StreamEvent::Done(completion) => {
                assert_eq!(completion.content, "Hi");
                assert_eq!(completion.model, "fallback-model");
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    /// A stream that ends without `message_stop` surfaces an error
    #[tokio::test]
    async fn test_pump_message_stream_truncation_is_an_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let chunks: Vec<reqwest::Result<Bytes>> = vec![Ok(Bytes::from(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        ))];

        pump_message_stream(futures::stream::iter(chunks), "m".to_string(), tx).await;

        let _delta = rx.try_recv().unwrap().unwrap();
        let last = rx.try_recv().unwrap();
        assert!(last.is_err());
    }

    #[test]
    fn test_format_claude_api_error_truncates_body() {
        let long_body = "x".repeat(1000);
        let error = format_claude_api_error(reqwest::StatusCode::TOO_MANY_REQUESTS, &long_body);
        let text = error.to_string();
        assert!(text.contains("429"));
        assert!(text.len() < 500);
    }
}

//! Claude provider tests against a mocked Messages API

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use talkai::config::{ClaudeConfig, StoreInfo};
use talkai::providers::{ClaudeProvider, Provider, StreamEvent};

fn provider_for(server: &MockServer) -> ClaudeProvider {
    let config = ClaudeConfig {
        api_base: Some(server.uri()),
        api_key: Some("sk-test".to_string()),
        ..Default::default()
    };
    ClaudeProvider::new(config).unwrap()
}

#[tokio::test]
async fn test_complete_returns_text_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 1024,
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-5-sonnet-20241022",
            "content": [{ "type": "text", "text": "We're open 9-6 weekdays." }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 40, "output_tokens": 17 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let completion = provider
        .complete(&[], &StoreInfo::default(), &[])
        .await
        .unwrap();

    assert_eq!(completion.content, "We're open 9-6 weekdays.");
    assert_eq!(completion.model, "claude-3-5-sonnet-20241022");
    assert_eq!(completion.tokens_used, 57);
}

#[tokio::test]
async fn test_complete_propagates_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": { "type": "rate_limit_error", "message": "Rate limited" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let result = provider.complete(&[], &StoreInfo::default(), &[]).await;

    let error = result.unwrap_err().to_string();
    assert!(error.contains("429"), "unexpected error: {error}");
}

#[tokio::test]
async fn test_complete_stream_yields_deltas_then_done() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-3-5-sonnet-20241022\",\"usage\":{\"input_tokens\":40}}}\n",
        "\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"We're open \"}}\n",
        "\n",
        "event: ping\n",
        "data: {\"type\":\"ping\"}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"9-6 weekdays.\"}}\n",
        "\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":17}}\n",
        "\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .complete_stream(&[], &StoreInfo::default(), &[])
        .await
        .unwrap();

    let mut deltas = Vec::new();
    let mut done = None;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            StreamEvent::Delta(fragment) => deltas.push(fragment),
            StreamEvent::Done(completion) => done = Some(completion),
        }
    }

    assert_eq!(deltas, vec!["We're open ", "9-6 weekdays."]);
    let done = done.expect("missing terminal event");
    assert_eq!(done.content, "We're open 9-6 weekdays.");
    assert_eq!(done.model, "claude-3-5-sonnet-20241022");
    assert_eq!(done.tokens_used, 57);
}

#[tokio::test]
async fn test_complete_stream_surfaces_mid_stream_error() {
    let server = MockServer::start().await;

    let sse_body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":5}}}\n",
        "\n",
        "event: error\n",
        "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .complete_stream(&[], &StoreInfo::default(), &[])
        .await
        .unwrap();

    let mut saw_error = false;
    while let Some(event) = stream.next().await {
        if let Err(e) = event {
            assert!(e.to_string().contains("Overloaded"));
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn test_complete_stream_truncated_body_is_an_error() {
    let server = MockServer::start().await;

    // Deltas but no message_stop: the connection just ends
    let sse_body = concat!(
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"We're\"}}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .complete_stream(&[], &StoreInfo::default(), &[])
        .await
        .unwrap();

    let mut last_was_error = false;
    while let Some(event) = stream.next().await {
        last_was_error = event.is_err();
    }
    assert!(last_was_error, "truncated stream must end with an error");
}

#[tokio::test]
async fn test_system_prompt_and_history_reach_the_api() {
    use talkai::storage::{ConversationStore, NewMessage, Sender, SqliteStore};

    let server = MockServer::start().await;

    let mut store_info = StoreInfo::default();
    store_info.name = "WooCommerce TalkAI Store".to_string();

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({
            "messages": [
                { "role": "user", "content": "What are your store hours?" },
            ],
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [{ "type": "text", "text": "ok" }],
            "usage": { "input_tokens": 1, "output_tokens": 1 },
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Build real history through the store so filtering is end-to-end
    let tmp = tempfile::TempDir::new().unwrap();
    let store = SqliteStore::new_with_path(tmp.path().join("db.sqlite")).unwrap();
    store
        .append("s1", NewMessage::text(Sender::User, "What are your store hours?"))
        .await
        .unwrap();
    let mut voice = NewMessage::text(Sender::User, "a voice note");
    voice.kind = talkai::storage::MessageKind::Voice;
    store.append("s1", voice).await.unwrap();

    let history = store.fetch_recent("s1", 10).await.unwrap();

    let provider = provider_for(&server);
    let completion = provider.complete(&history, &store_info, &[]).await.unwrap();
    assert_eq!(completion.content, "ok");
}

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use talkai::auth::GoogleVerifier;
use talkai::config::StoreInfo;
use talkai::error::{Result, TalkaiError};
use talkai::orchestrator::ChatOrchestrator;
use talkai::providers::{ChunkStream, Completion, Provider, StreamEvent};
use talkai::server::AppState;
use talkai::storage::{MessageBus, ProductCard, SqliteStore, StoredMessage};

/// Provider double that replays a fixed reply and counts calls
#[allow(dead_code)]
pub struct ScriptedProvider {
    reply: String,
    tokens: usize,
    fail: bool,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn replying(reply: &str, tokens: usize) -> Self {
        Self {
            reply: reply.to_string(),
            tokens,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: String::new(),
            tokens: 0,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn completion(&self) -> Completion {
        Completion {
            content: self.reply.clone(),
            model: "scripted-model".to_string(),
            tokens_used: self.tokens,
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        _history: &[StoredMessage],
        _store: &StoreInfo,
        _products: &[ProductCard],
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TalkaiError::Completion("scripted failure".to_string()).into());
        }
        Ok(self.completion())
    }

    async fn complete_stream(
        &self,
        _history: &[StoredMessage],
        _store: &StoreInfo,
        _products: &[ProductCard],
    ) -> Result<ChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(TalkaiError::Completion("scripted failure".to_string()).into());
        }
        // Fragment the reply so chunk reassembly is actually exercised
        let mut events: Vec<Result<StreamEvent>> = self
            .reply
            .split_inclusive(' ')
            .map(|fragment| Ok(StreamEvent::Delta(fragment.to_string())))
            .collect();
        events.push(Ok(StreamEvent::Done(self.completion())));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Build an in-process app over a scratch database and a scripted provider
#[allow(dead_code)]
pub fn test_state(provider: Arc<ScriptedProvider>) -> (AppState, Arc<SqliteStore>, TempDir) {
    test_state_with_userinfo(provider, "http://127.0.0.1:9/userinfo")
}

/// Same as [`test_state`], with the Google userinfo endpoint overridden
#[allow(dead_code)]
pub fn test_state_with_userinfo(
    provider: Arc<ScriptedProvider>,
    userinfo_url: &str,
) -> (AppState, Arc<SqliteStore>, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = Arc::new(
        SqliteStore::new_with_path(tmp.path().join("conversations.db"))
            .expect("failed to create sqlite store"),
    );
    let bus = Arc::new(MessageBus::new());

    let orchestrator = Arc::new(ChatOrchestrator::new(
        store.clone(),
        provider,
        bus.clone(),
        StoreInfo::default(),
        10,
        Duration::from_secs(5),
    ));

    let state = AppState {
        orchestrator,
        store: store.clone(),
        bus,
        auth: Arc::new(GoogleVerifier::new(userinfo_url).expect("failed to build verifier")),
        fetch_limit: 50,
    };

    (state, store, tmp)
}

/// Split a `text/event-stream` body into parsed JSON data payloads
#[allow(dead_code)]
pub fn parse_sse_events(body: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter_map(|block| {
            let data_lines: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:").map(str::trim))
                .collect();
            if data_lines.is_empty() {
                None
            } else {
                serde_json::from_str(&data_lines.join("\n")).ok()
            }
        })
        .collect()
}

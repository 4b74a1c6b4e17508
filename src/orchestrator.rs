//! Chat pipeline orchestration
//!
//! The orchestrator is the single entry point that turns one inbound user
//! message into persisted messages and an LLM reply. The pipeline is
//! strictly sequential per request: validate, persist the user turn,
//! refresh conversation metadata, load bounded history, call the provider
//! (streamed or not), persist the assistant turn, refresh metadata again.
//!
//! Nothing is rolled back on failure: a persisted user message stays
//! persisted when the LLM call fails. The streamed variant runs in its own
//! task, so a client that disconnects mid-stream never cancels the final
//! persistence step.

use crate::config::StoreInfo;
use crate::error::{Result, TalkaiError};
use crate::providers::{Provider, StreamEvent};
use crate::storage::{
    ConversationPatch, ConversationStore, MessageBus, NewMessage, Sender, StoredMessage,
};

use futures::StreamExt;
use metrics::{histogram, increment_counter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// Result of a non-streamed chat request
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Id of the persisted assistant message
    pub message_id: String,
    /// Full assistant reply
    pub content: String,
    /// Input plus output tokens, as reported by the provider
    pub tokens_used: usize,
}

/// One event of a streamed chat request, as relayed to the transport layer
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// One incremental fragment of the assistant reply
    Chunk(String),
    /// Terminal event: the reply was fully generated and persisted
    Done { message_id: String },
    /// Terminal event: the pipeline failed; chunks already sent stand
    Error(String),
}

/// The chat request pipeline
///
/// Constructed once at startup with its collaborators injected, then
/// shared across all concurrent requests. Holds no mutable state.
pub struct ChatOrchestrator {
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn Provider>,
    bus: Arc<MessageBus>,
    store_info: StoreInfo,
    history_limit: usize,
    completion_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        provider: Arc<dyn Provider>,
        bus: Arc<MessageBus>,
        store_info: StoreInfo,
        history_limit: usize,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            bus,
            store_info,
            history_limit,
            completion_timeout,
        }
    }

    /// Reject requests with missing or empty required fields
    ///
    /// Runs before any store or provider call.
    fn validate(session_id: &str, message: &str) -> Result<()> {
        if session_id.trim().is_empty() || message.trim().is_empty() {
            return Err(
                TalkaiError::InvalidRequest("Missing sessionId or message".to_string()).into(),
            );
        }
        Ok(())
    }

    /// Handle one chat request synchronously
    ///
    /// Returns once the assistant reply is generated and persisted.
    pub async fn handle(&self, session_id: &str, message: &str) -> Result<ChatOutcome> {
        Self::validate(session_id, message)?;
        increment_counter!("talkai_chat_requests_total", "mode" => "sync");

        let history = self.record_user_turn(session_id, message).await?;

        let started = Instant::now();
        let completion = match tokio::time::timeout(
            self.completion_timeout,
            self.provider
                .complete(&history, &self.store_info, &[]),
        )
        .await
        {
            Ok(result) => result.map_err(|e| {
                increment_counter!("talkai_completions_total", "status" => "error");
                tracing::error!(session_id, "Completion failed: {}", e);
                e
            })?,
            Err(_) => {
                increment_counter!("talkai_completions_total", "status" => "timeout");
                tracing::error!(session_id, "Completion timed out");
                return Err(
                    TalkaiError::CompletionTimeout(self.completion_timeout.as_secs()).into(),
                );
            }
        };
        increment_counter!("talkai_completions_total", "status" => "ok");
        histogram!(
            "talkai_completion_duration_seconds",
            started.elapsed().as_secs_f64(),
            "mode" => "sync"
        );

        let stored = self
            .record_assistant_turn(session_id, &completion.content)
            .await?;

        tracing::info!(
            session_id,
            message_id = %stored.id,
            tokens = completion.tokens_used,
            "Chat turn completed"
        );

        Ok(ChatOutcome {
            message_id: stored.id,
            content: completion.content,
            tokens_used: completion.tokens_used,
        })
    }

    /// Handle one chat request as a stream of events
    ///
    /// The user message is persisted and history loaded before this
    /// returns, so request-level failures surface as a plain error rather
    /// than an in-stream event. The LLM call and the final persistence run
    /// in a detached task: dropping the returned stream stops delivery but
    /// the assistant turn is still completed and persisted.
    pub async fn handle_stream(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<ReceiverStream<ChatEvent>> {
        Self::validate(session_id, message)?;
        increment_counter!("talkai_chat_requests_total", "mode" => "stream");

        let history = self.record_user_turn(session_id, message).await?;

        let (tx, rx) = mpsc::channel::<ChatEvent>(32);

        let store = Arc::clone(&self.store);
        let provider = Arc::clone(&self.provider);
        let bus = Arc::clone(&self.bus);
        let store_info = self.store_info.clone();
        let session_id = session_id.to_string();
        let completion_timeout = self.completion_timeout;

        tokio::spawn(async move {
            run_stream_pipeline(
                store,
                provider,
                bus,
                store_info,
                session_id,
                history,
                completion_timeout,
                tx,
            )
            .await;
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Persist the user message, refresh metadata, and load history
    ///
    /// The append completes before the history fetch so the read includes
    /// the message that was just written.
    async fn record_user_turn(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<Vec<StoredMessage>> {
        let stored = self
            .store
            .append(session_id, NewMessage::text(Sender::User, message))
            .await
            .map_err(|e| {
                tracing::error!(session_id, "Failed to persist user message: {}", e);
                e
            })?;
        tracing::debug!(session_id, message_id = %stored.id, "Saved user message");
        self.bus.publish(session_id, &stored);

        refresh_conversation(self.store.as_ref(), session_id, &stored).await?;

        self.store.fetch_recent(session_id, self.history_limit).await
    }

    /// Persist the assistant reply and refresh metadata
    async fn record_assistant_turn(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<StoredMessage> {
        record_assistant_turn(self.store.as_ref(), &self.bus, session_id, content).await
    }
}

/// Persist an assistant reply, publish it, and refresh metadata
async fn record_assistant_turn(
    store: &dyn ConversationStore,
    bus: &MessageBus,
    session_id: &str,
    content: &str,
) -> Result<StoredMessage> {
    let stored = store
        .append(session_id, NewMessage::text(Sender::Assistant, content))
        .await
        .map_err(|e| {
            tracing::error!(session_id, "Failed to persist assistant message: {}", e);
            e
        })?;
    tracing::debug!(session_id, message_id = %stored.id, "Saved assistant message");
    bus.publish(session_id, &stored);

    refresh_conversation(store, session_id, &stored).await?;
    Ok(stored)
}

/// Merge the latest turn into the conversation metadata
///
/// A separate write from the message append; a crash between the two
/// leaves the metadata stale, which the next turn repairs since the count
/// is recomputed from the messages themselves.
async fn refresh_conversation(
    store: &dyn ConversationStore,
    session_id: &str,
    last: &StoredMessage,
) -> Result<()> {
    let count = store.count_messages(session_id).await?;
    store
        .upsert_conversation(
            session_id,
            ConversationPatch {
                last_message: Some(last.content.clone()),
                last_message_time: Some(last.timestamp),
                message_count: Some(count),
                context: None,
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(session_id, "Failed to update conversation metadata: {}", e);
            e
        })
}

/// The streamed half of the pipeline, run in a detached task
///
/// Forwards fragments to the transport channel as they arrive, then
/// persists the full reply. Send failures (the reader disconnected) do not
/// stop the provider stream or the final persistence.
#[allow(clippy::too_many_arguments)]
async fn run_stream_pipeline(
    store: Arc<dyn ConversationStore>,
    provider: Arc<dyn Provider>,
    bus: Arc<MessageBus>,
    store_info: StoreInfo,
    session_id: String,
    history: Vec<StoredMessage>,
    completion_timeout: Duration,
    tx: mpsc::Sender<ChatEvent>,
) {
    let started = Instant::now();
    let deadline = started + completion_timeout;

    let send_error = |message: String| {
        let tx = tx.clone();
        async move {
            // The receiver may already be gone; nothing else to do then.
            let _ = tx.send(ChatEvent::Error(message)).await;
        }
    };

    let mut stream = match tokio::time::timeout_at(
        deadline,
        provider.complete_stream(&history, &store_info, &[]),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            increment_counter!("talkai_completions_total", "status" => "error");
            tracing::error!(session_id, "Failed to open completion stream: {}", e);
            send_error(e.to_string()).await;
            return;
        }
        Err(_) => {
            increment_counter!("talkai_completions_total", "status" => "timeout");
            tracing::error!(session_id, "Completion timed out");
            send_error(
                TalkaiError::CompletionTimeout(completion_timeout.as_secs()).to_string(),
            )
            .await;
            return;
        }
    };

    let completion = loop {
        let event = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(event) => event,
            Err(_) => {
                increment_counter!("talkai_completions_total", "status" => "timeout");
                tracing::error!(session_id, "Completion timed out mid-stream");
                send_error(
                    TalkaiError::CompletionTimeout(completion_timeout.as_secs()).to_string(),
                )
                .await;
                return;
            }
        };

        match event {
            Some(Ok(StreamEvent::Delta(fragment))) => {
                // A closed channel means the client went away; keep
                // consuming so the reply is completed and persisted.
                let _ = tx.send(ChatEvent::Chunk(fragment)).await;
            }
            Some(Ok(StreamEvent::Done(completion))) => break completion,
            Some(Err(e)) => {
                increment_counter!("talkai_completions_total", "status" => "error");
                tracing::error!(session_id, "Streaming error: {}", e);
                send_error(e.to_string()).await;
                return;
            }
            None => {
                increment_counter!("talkai_completions_total", "status" => "error");
                tracing::error!(session_id, "Completion stream ended without a terminal event");
                send_error("Completion stream ended unexpectedly".to_string()).await;
                return;
            }
        }
    };

    increment_counter!("talkai_completions_total", "status" => "ok");
    histogram!(
        "talkai_completion_duration_seconds",
        started.elapsed().as_secs_f64(),
        "mode" => "stream"
    );

    match record_assistant_turn(store.as_ref(), &bus, &session_id, &completion.content).await {
        Ok(stored) => {
            tracing::info!(
                session_id,
                message_id = %stored.id,
                tokens = completion.tokens_used,
                "Chat turn completed"
            );
            let _ = tx.send(ChatEvent::Done {
                message_id: stored.id,
            })
            .await;
        }
        Err(e) => {
            send_error(e.to_string()).await;
        }
    }
}

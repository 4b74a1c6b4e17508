//! Base provider trait and common types for TalkAI
//!
//! This module defines the Provider trait that the LLM completion client
//! implements, along with the context-message mapping from stored history
//! and the streaming fragment abstraction the transport layer consumes.

use crate::config::StoreInfo;
use crate::error::Result;
use crate::storage::{MessageKind, ProductCard, Sender, StoredMessage};
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// One turn of LLM context, in the provider's role vocabulary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    /// Creates a new user message
    ///
    /// # Examples
    ///
    /// ```
    /// use talkai::providers::ChatMessage;
    ///
    /// let msg = ChatMessage::user("What are your store hours?");
    /// assert_eq!(msg.role, "user");
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Creates a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A finished completion, with usage accounting
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Full response text
    pub content: String,
    /// Model that produced the response
    pub model: String,
    /// Input plus output tokens, as reported by the provider
    pub tokens_used: usize,
}

/// One event of a streamed completion
///
/// A stream yields zero or more `Delta` fragments followed by exactly one
/// `Done` carrying the accumulated completion. The stream is lazy, finite,
/// and non-restartable; dropping it simply stops consumption.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One incremental fragment of generated text
    Delta(String),
    /// Terminal event with the full text and usage accounting
    Done(Completion),
}

/// Boxed stream of completion events
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Provider trait for LLM completion clients
///
/// The provider owns prompt construction: persona instructions plus the
/// store information and any relevant products, with the conversation
/// history mapped through [`context_messages`]. Provider errors propagate
/// to the caller unchanged; no retry happens at this layer.
#[async_trait]
pub trait Provider: Send + Sync {
    /// One blocking completion call
    async fn complete(
        &self,
        history: &[StoredMessage],
        store: &StoreInfo,
        products: &[ProductCard],
    ) -> Result<Completion>;

    /// Open an incremental token stream for the same inputs
    ///
    /// The returned stream yields text fragments as they arrive and
    /// resolves usage accounting in the terminal event.
    async fn complete_stream(
        &self,
        history: &[StoredMessage],
        store: &StoreInfo,
        products: &[ProductCard],
    ) -> Result<ChunkStream>;
}

/// Map stored history to LLM context messages
///
/// Only `text`-kind messages participate in context construction; voice,
/// file, image, and product messages are skipped. Sender roles map onto
/// the provider vocabulary ("user"/"assistant").
///
/// # Examples
///
/// ```
/// use talkai::providers::context_messages;
///
/// let history = vec![];
/// assert!(context_messages(&history).is_empty());
/// ```
pub fn context_messages(history: &[StoredMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| m.kind == MessageKind::Text)
        .map(|m| ChatMessage {
            role: match m.sender {
                Sender::User => "user".to_string(),
                Sender::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        })
        .collect()
}

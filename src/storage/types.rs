//! Data model for conversations and messages
//!
//! These types are both the persistence schema and the wire format: the
//! HTTP layer serializes them with the camelCase field names the widget
//! expects, and the store reads/writes the same fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a chat message
///
/// Only `Text` messages participate in LLM context construction; the other
/// kinds are persisted and relayed but never forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Voice,
    File,
    Image,
    Product,
}

impl MessageKind {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::File => "file",
            Self::Image => "image",
            Self::Product => "product",
        }
    }

    /// Parse the database string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "voice" => Some(Self::Voice),
            "file" => Some(Self::File),
            "image" => Some(Self::Image),
            "product" => Some(Self::Product),
            _ => None,
        }
    }
}

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse the database string form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A recommended product attached to a `product`-kind message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCard {
    pub id: String,
    pub title: String,
    /// Display price, e.g. "$89.99"
    pub price: String,
    /// Image reference (URL or glyph)
    pub image: String,
    pub rating: f64,
    pub reviews: u64,
    pub url: String,
}

/// A message as persisted in (and returned from) the conversation store
///
/// The `id` and `timestamp` are store-assigned: ULID ids sort by creation
/// time, which gives a stable total order within a conversation even when
/// two messages land on the same timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Voice note length in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductCard>,
}

/// A message as submitted for persistence (id and timestamp not yet assigned)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<ProductCard>,
}

impl NewMessage {
    /// Creates a new plain-text message
    ///
    /// # Examples
    ///
    /// ```
    /// use talkai::storage::{NewMessage, MessageKind, Sender};
    ///
    /// let msg = NewMessage::text(Sender::User, "What are your store hours?");
    /// assert_eq!(msg.kind, MessageKind::Text);
    /// assert_eq!(msg.sender, Sender::User);
    /// ```
    pub fn text(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
            sender,
            duration: None,
            file_url: None,
            file_name: None,
            file_size: None,
            product: None,
        }
    }
}

/// Conversation metadata, keyed by session id
///
/// Created implicitly on the first message; only metadata is ever updated
/// afterwards. `context` carries free-form client details such as the
/// originating URL and user agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial conversation-metadata update
///
/// Unset fields are left untouched by `upsert_conversation`; there is no way
/// to clear a field back to NULL through this type, matching the
/// merge-upsert semantics of the store contract.
#[derive(Debug, Clone, Default)]
pub struct ConversationPatch {
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: Option<u64>,
    pub context: Option<serde_json::Value>,
}

/// Partial message update applied by the PATCH endpoint
///
/// Unknown fields in the incoming `updates` object are rejected rather than
/// silently dropped, so callers learn about typos.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageUpdate {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub product: Option<ProductCard>,
}

impl MessageUpdate {
    /// True when no field is set (an empty PATCH is rejected upstream)
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.duration.is_none()
            && self.file_url.is_none()
            && self.file_name.is_none()
            && self.file_size.is_none()
            && self.product.is_none()
    }
}

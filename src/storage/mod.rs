//! Conversation persistence for TalkAI
//!
//! The [`ConversationStore`] trait is the seam between the chat pipeline and
//! the actual database: ordered per-conversation appends, bounded history
//! reads, and merge-upserts of conversation metadata. The production
//! implementation is [`SqliteStore`]; tests substitute their own
//! implementations through the trait.

use crate::error::{Result, TalkaiError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use ulid::Ulid;

pub mod bus;
pub mod types;

pub use bus::MessageBus;
pub use types::{
    Conversation, ConversationPatch, MessageKind, MessageUpdate, NewMessage, ProductCard, Sender,
    StoredMessage,
};

/// Abstract conversation store
///
/// Implementations must assign message ids and timestamps on the server
/// side, keep messages totally ordered by creation time within a
/// conversation, and merge (not overwrite) metadata on upsert. There is no
/// transactional linkage between `append` and `upsert_conversation`; a crash
/// between the two leaves metadata stale but messages intact.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a message with a store-assigned id and timestamp
    ///
    /// Returns the stored message, including the assigned fields. Fails with
    /// a `Storage` error if the underlying database call errors; a write is
    /// never silently dropped.
    async fn append(&self, session_id: &str, message: NewMessage) -> Result<StoredMessage>;

    /// Fetch at most `limit` most-recent messages, oldest first
    ///
    /// Returns an empty vector when the conversation has no messages yet.
    async fn fetch_recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Merge the given fields into the conversation's metadata
    ///
    /// Creates the conversation row on first touch; fields not present in
    /// the patch are left untouched.
    async fn upsert_conversation(&self, session_id: &str, patch: ConversationPatch) -> Result<()>;

    /// Read conversation metadata, if the conversation exists
    async fn get_conversation(&self, session_id: &str) -> Result<Option<Conversation>>;

    /// Merge the given fields into an existing message
    ///
    /// Fails with a `Storage` error when the message does not exist.
    async fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        updates: MessageUpdate,
    ) -> Result<()>;

    /// Delete a message
    ///
    /// Deleting a message that does not exist is a no-op, matching
    /// document-store delete semantics.
    async fn delete_message(&self, session_id: &str, message_id: &str) -> Result<()>;

    /// Count the messages in a conversation
    async fn count_messages(&self, session_id: &str) -> Result<u64>;
}

/// Current UTC time as a fixed-width RFC-3339 string
///
/// Microsecond precision with a `Z` suffix keeps the text form
/// lexicographically ordered, which the history query relies on.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed conversation store
///
/// Opens a connection per call inside `spawn_blocking` so the async
/// executor is never blocked on database IO. Message ids are ULIDs, which
/// sort by creation time and break ties between same-instant appends.
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create a store at the default location
    ///
    /// Resolves the database file under the user's data directory, unless
    /// `TALKAI_DB_PATH` points somewhere else (useful for tests and
    /// containers).
    pub fn open_default() -> Result<Self> {
        if let Ok(override_path) = std::env::var("TALKAI_DB_PATH") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("ai", "talkai", "talkai")
            .ok_or_else(|| TalkaiError::Storage("Could not determine data directory".into()))?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .map_err(|e| TalkaiError::Storage(format!("Failed to create data directory: {}", e)))?;

        Self::new_with_path(data_dir.join("conversations.db"))
    }

    /// Create a store that uses the specified database path
    ///
    /// # Examples
    ///
    /// ```
    /// use talkai::storage::SqliteStore;
    ///
    /// let store = SqliteStore::new_with_path("/tmp/talkai_doc_test.db").unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TalkaiError::Storage(format!("Failed to create database directory: {}", e))
            })?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = Self::open_conn(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                session_id TEXT PRIMARY KEY,
                last_message TEXT,
                last_message_time TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                context TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| TalkaiError::Storage(format!("Failed to create tables: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                sender TEXT NOT NULL,
                created_at TEXT NOT NULL,
                duration REAL,
                file_url TEXT,
                file_name TEXT,
                file_size INTEGER,
                product TEXT
            )",
            [],
        )
        .map_err(|e| TalkaiError::Storage(format!("Failed to create tables: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session
             ON messages (session_id, created_at, id)",
            [],
        )
        .map_err(|e| TalkaiError::Storage(format!("Failed to create index: {}", e)))?;

        Ok(())
    }

    fn open_conn(db_path: &std::path::Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .map_err(|e| TalkaiError::Storage(format!("Failed to open database: {}", e)))?;
        // Readers and the per-request writer otherwise trip SQLITE_BUSY
        // under concurrent requests.
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| TalkaiError::Storage(format!("Failed to set busy timeout: {}", e)))?;
        Ok(conn)
    }

    /// Run a blocking closure against a fresh connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open_conn(&db_path)?;
            f(conn)
        })
        .await
        .map_err(|e| TalkaiError::Storage(format!("Storage task failed: {}", e)))?
    }
}

/// Map one `messages` row to a [`StoredMessage`]
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(StoredMessage, Option<String>)> {
    let kind_raw: String = row.get(1)?;
    let sender_raw: String = row.get(3)?;
    let created_raw: String = row.get(4)?;
    let product_raw: Option<String> = row.get(9)?;

    let message = StoredMessage {
        id: row.get(0)?,
        kind: MessageKind::parse(&kind_raw).unwrap_or(MessageKind::Text),
        content: row.get(2)?,
        sender: Sender::parse(&sender_raw).unwrap_or(Sender::Assistant),
        timestamp: parse_timestamp(&created_raw),
        duration: row.get(5)?,
        file_url: row.get(6)?,
        file_name: row.get(7)?,
        file_size: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        product: None,
    };

    Ok((message, product_raw))
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const MESSAGE_COLUMNS: &str =
    "id, kind, content, sender, created_at, duration, file_url, file_name, file_size, product";

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append(&self, session_id: &str, message: NewMessage) -> Result<StoredMessage> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let id = Ulid::new().to_string();
            let created_at = now_rfc3339();
            let product_json = message
                .product
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| TalkaiError::Storage(format!("Serialization failed: {}", e)))?;

            conn.execute(
                "INSERT INTO messages
                 (id, session_id, kind, content, sender, created_at,
                  duration, file_url, file_name, file_size, product)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    id,
                    session_id,
                    message.kind.as_str(),
                    message.content,
                    message.sender.as_str(),
                    created_at,
                    message.duration,
                    message.file_url,
                    message.file_name,
                    message.file_size.map(|v| v as i64),
                    product_json,
                ],
            )
            .map_err(|e| TalkaiError::Storage(format!("Insert failed: {}", e)))?;

            Ok(StoredMessage {
                id,
                kind: message.kind,
                content: message.content,
                sender: message.sender,
                timestamp: parse_timestamp(&created_at),
                duration: message.duration,
                file_url: message.file_url,
                file_name: message.file_name,
                file_size: message.file_size,
                product: message.product,
            })
        })
        .await
    }

    async fn fetch_recent(&self, session_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM messages
                     WHERE session_id = ?1
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?2",
                    MESSAGE_COLUMNS
                ))
                .map_err(|e| TalkaiError::Storage(format!("Query failed: {}", e)))?;

            let rows = stmt
                .query_map(params![session_id, limit as i64], row_to_message)
                .map_err(|e| TalkaiError::Storage(format!("Query failed: {}", e)))?;

            let mut messages = Vec::new();
            for row in rows {
                let (mut message, product_raw) =
                    row.map_err(|e| TalkaiError::Storage(format!("Row read failed: {}", e)))?;
                if let Some(raw) = product_raw {
                    message.product = Some(serde_json::from_str(&raw).map_err(|e| {
                        TalkaiError::Storage(format!("Deserialization failed: {}", e))
                    })?);
                }
                messages.push(message);
            }

            // Query returns newest-first; callers want ascending order.
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    async fn upsert_conversation(&self, session_id: &str, patch: ConversationPatch) -> Result<()> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let now = now_rfc3339();
            let context_json = patch
                .context
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| TalkaiError::Storage(format!("Serialization failed: {}", e)))?;

            conn.execute(
                "INSERT INTO conversations
                 (session_id, last_message, last_message_time, message_count,
                  context, created_at, updated_at)
                 VALUES (?1, ?2, ?3, COALESCE(?4, 0), ?5, ?6, ?6)
                 ON CONFLICT(session_id) DO UPDATE SET
                     last_message = COALESCE(excluded.last_message, conversations.last_message),
                     last_message_time = COALESCE(excluded.last_message_time, conversations.last_message_time),
                     message_count = COALESCE(?4, conversations.message_count),
                     context = COALESCE(excluded.context, conversations.context),
                     updated_at = excluded.updated_at",
                params![
                    session_id,
                    patch.last_message,
                    patch
                        .last_message_time
                        .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true)),
                    patch.message_count.map(|v| v as i64),
                    context_json,
                    now,
                ],
            )
            .map_err(|e| TalkaiError::Storage(format!("Upsert failed: {}", e)))?;

            Ok(())
        })
        .await
    }

    async fn get_conversation(&self, session_id: &str) -> Result<Option<Conversation>> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT session_id, last_message, last_message_time, message_count,
                            context, created_at, updated_at
                     FROM conversations WHERE session_id = ?1",
                    params![session_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| TalkaiError::Storage(format!("Query failed: {}", e)))?;

            let Some((sid, last_message, last_time, count, context_raw, created, updated)) = row
            else {
                return Ok(None);
            };

            let context = context_raw
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .map_err(|e| TalkaiError::Storage(format!("Deserialization failed: {}", e)))?;

            Ok(Some(Conversation {
                session_id: sid,
                last_message,
                last_message_time: last_time.as_deref().map(parse_timestamp),
                message_count: count as u64,
                context,
                created_at: parse_timestamp(&created),
                updated_at: parse_timestamp(&updated),
            }))
        })
        .await
    }

    async fn update_message(
        &self,
        session_id: &str,
        message_id: &str,
        updates: MessageUpdate,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        let message_id = message_id.to_string();

        self.with_conn(move |conn| {
            use rusqlite::types::Value;

            let mut sets: Vec<&'static str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(content) = updates.content {
                sets.push("content = ?");
                values.push(Value::Text(content));
            }
            if let Some(duration) = updates.duration {
                sets.push("duration = ?");
                values.push(Value::Real(duration));
            }
            if let Some(file_url) = updates.file_url {
                sets.push("file_url = ?");
                values.push(Value::Text(file_url));
            }
            if let Some(file_name) = updates.file_name {
                sets.push("file_name = ?");
                values.push(Value::Text(file_name));
            }
            if let Some(file_size) = updates.file_size {
                sets.push("file_size = ?");
                values.push(Value::Integer(file_size as i64));
            }
            if let Some(product) = updates.product {
                let raw = serde_json::to_string(&product)
                    .map_err(|e| TalkaiError::Storage(format!("Serialization failed: {}", e)))?;
                sets.push("product = ?");
                values.push(Value::Text(raw));
            }

            if sets.is_empty() {
                return Err(TalkaiError::InvalidRequest("empty updates".to_string()).into());
            }

            values.push(Value::Text(session_id.clone()));
            values.push(Value::Text(message_id.clone()));

            let sql = format!(
                "UPDATE messages SET {} WHERE session_id = ? AND id = ?",
                sets.join(", ")
            );

            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(values))
                .map_err(|e| TalkaiError::Storage(format!("Update failed: {}", e)))?;

            if changed == 0 {
                return Err(TalkaiError::Storage(format!(
                    "Message {} not found in session {}",
                    message_id, session_id
                ))
                .into());
            }

            Ok(())
        })
        .await
    }

    async fn delete_message(&self, session_id: &str, message_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        let message_id = message_id.to_string();

        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM messages WHERE session_id = ?1 AND id = ?2",
                params![session_id, message_id],
            )
            .map_err(|e| TalkaiError::Storage(format!("Delete failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn count_messages(&self, session_id: &str) -> Result<u64> {
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .map_err(|e| TalkaiError::Storage(format!("Query failed: {}", e)))?;
            Ok(count as u64)
        })
        .await
    }
}

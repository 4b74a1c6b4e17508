//! In-process message fan-out for realtime subscribers
//!
//! Every successful append is published here so that watch subscribers
//! (the SSE endpoint) observe new messages without polling. Publishing is
//! fire-and-forget: a session with no subscribers drops the event, and a
//! slow subscriber that lags past the channel capacity misses events and
//! should re-fetch history.

use crate::storage::StoredMessage;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Per-session broadcast channel capacity
const CHANNEL_CAPACITY: usize = 64;

/// Broadcast bus of stored messages, keyed by session id
#[derive(Default)]
pub struct MessageBus {
    channels: Mutex<HashMap<String, broadcast::Sender<StoredMessage>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to all future appends for a session
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<StoredMessage> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a newly appended message to any subscribers
    pub fn publish(&self, session_id: &str, message: &StoredMessage) {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stale = match channels.get(session_id) {
            Some(sender) => sender.send(message.clone()).is_err() || sender.receiver_count() == 0,
            None => false,
        };
        if stale {
            // Last subscriber is gone; drop the channel so idle sessions
            // do not accumulate.
            channels.remove(session_id);
        }
    }
}

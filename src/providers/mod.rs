//! Provider module for TalkAI
//!
//! This module contains the LLM provider abstraction and the Claude
//! implementation.

pub mod base;
pub mod claude;

pub use base::{context_messages, ChatMessage, ChunkStream, Completion, Provider, StreamEvent};
pub use claude::ClaudeProvider;

use crate::config::ProviderConfig;
use crate::error::Result;
use std::sync::Arc;

/// Create a provider instance based on configuration
///
/// # Errors
///
/// Returns error if the provider type is unknown or initialization fails
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config.provider_type.as_str() {
        "claude" => Ok(Arc::new(ClaudeProvider::new(config.claude.clone())?)),
        other => Err(
            crate::error::TalkaiError::Config(format!("Unknown provider type: {}", other)).into(),
        ),
    }
}

//! TalkAI - customer-support chat service library
//!
//! This library provides the core functionality of the TalkAI chat
//! backend: the chat pipeline, the LLM provider abstraction, conversation
//! persistence, and the HTTP transport layer.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `orchestrator`: The chat pipeline (persist, load history, complete, relay)
//! - `providers`: LLM provider abstraction and the Claude implementation
//! - `storage`: Conversation store trait, SQLite implementation, message bus
//! - `server`: axum HTTP transport (JSON and SSE endpoints)
//! - `prompts`: System prompt construction from store information
//! - `auth`: Google sign-in verification and session token minting
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use talkai::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml")?;
//!     config.validate()?;
//!
//!     talkai::server::serve(config).await
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, StoreInfo};
pub use error::{Result, TalkaiError};
pub use orchestrator::{ChatEvent, ChatOrchestrator, ChatOutcome};
pub use providers::{ClaudeProvider, Completion, Provider};
pub use storage::{ConversationStore, SqliteStore};

//! Error types for TalkAI
//!
//! This module defines all error types used throughout the service,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for TalkAI operations
///
/// This enum encompasses all possible errors that can occur while serving
/// chat requests: configuration loading, request validation, conversation
/// persistence, LLM provider calls, and authentication.
#[derive(Error, Debug)]
pub enum TalkaiError {
    /// Configuration-related errors (missing values, unparseable files)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The caller sent a request with missing or malformed required fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// LLM provider errors (network, auth, rate limits, malformed replies)
    #[error("Completion error: {0}")]
    Completion(String),

    /// The LLM call exceeded the configured upper bound
    #[error("Completion timed out after {0} seconds")]
    CompletionTimeout(u64),

    /// Authentication errors (e.g. rejected provider access tokens)
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for TalkAI operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

//! Configuration management for TalkAI
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from the YAML config file and environment variables.
//! The provider API key is only ever read from the environment, never
//! from the config file.

use crate::error::{Result, TalkaiError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Main configuration structure for TalkAI
///
/// Holds everything the service needs: HTTP bind address, LLM provider
/// settings, chat pipeline limits, storage location, the store information
/// injected into every prompt, and the auth endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Provider configuration (Claude)
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Chat pipeline configuration
    #[serde(default)]
    pub chat: ChatConfig,

    /// Conversation storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Store information injected into every LLM prompt
    #[serde(default)]
    pub store: StoreInfo,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Type of provider to use
    #[serde(rename = "type", default = "default_provider_type")]
    pub provider_type: String,

    /// Claude configuration
    #[serde(default)]
    pub claude: ClaudeConfig,
}

fn default_provider_type() -> String {
    "claude".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: default_provider_type(),
            claude: ClaudeConfig::default(),
        }
    }
}

/// Claude provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Model to use
    #[serde(default = "default_claude_model")]
    pub model: String,

    /// Maximum tokens the model may generate per reply
    #[serde(default = "default_claude_max_tokens")]
    pub max_tokens: u32,

    /// Optional API base URL (useful for tests and local mocks)
    ///
    /// When set, this base is used to build the messages endpoint, which
    /// allows tests to point the provider at a mock server.
    #[serde(default)]
    pub api_base: Option<String>,

    /// API key, read from `ANTHROPIC_API_KEY` or `TALKAI_ANTHROPIC_API_KEY`
    ///
    /// Never read from (or written to) the config file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_claude_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}

fn default_claude_max_tokens() -> u32 {
    1024
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            model: default_claude_model(),
            max_tokens: default_claude_max_tokens(),
            api_base: None,
            api_key: None,
        }
    }
}

/// Chat pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How many recent messages to feed the LLM as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Default page size for the history endpoint
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,

    /// Upper bound on one LLM call (seconds)
    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_seconds: u64,
}

fn default_history_limit() -> usize {
    10
}

fn default_fetch_limit() -> usize {
    50
}

fn default_completion_timeout() -> u64 {
    60
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            fetch_limit: default_fetch_limit(),
            completion_timeout_seconds: default_completion_timeout(),
        }
    }
}

/// Conversation storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file path; defaults to the OS data directory when unset
    #[serde(default)]
    pub db_path: Option<String>,
}

/// Static store information injected into every LLM system prompt
///
/// Loaded once at startup and shared immutably across all requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfo {
    #[serde(default = "default_store_name")]
    pub name: String,

    #[serde(default = "default_store_description")]
    pub description: String,

    #[serde(default)]
    pub hours: Option<String>,

    #[serde(default)]
    pub locations: Vec<String>,

    /// Policy key/value pairs, serialized verbatim into the prompt
    #[serde(default)]
    pub policies: BTreeMap<String, String>,
}

fn default_store_name() -> String {
    "TalkAI Store".to_string()
}

fn default_store_description() -> String {
    "Your friendly e-commerce shopping assistant".to_string()
}

impl Default for StoreInfo {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            description: default_store_description(),
            hours: None,
            locations: Vec::new(),
            policies: BTreeMap::new(),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Google token verification settings
    #[serde(default)]
    pub google: GoogleAuthConfig,
}

/// Google token verification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleAuthConfig {
    /// Userinfo endpoint the presented access token is verified against
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,
}

fn default_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v3/userinfo".to_string()
}

impl Default for GoogleAuthConfig {
    fn default() -> Self {
        Self {
            userinfo_url: default_userinfo_url(),
        }
    }
}

impl Config {
    /// Load configuration from a file, then apply environment overrides
    ///
    /// Falls back to built-in defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default_config()
        };

        config.apply_env_vars();

        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            chat: ChatConfig::default(),
            storage: StorageConfig::default(),
            store: StoreInfo::default(),
            auth: AuthConfig::default(),
        }
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TalkaiError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| TalkaiError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(bind) = std::env::var("TALKAI_BIND") {
            self.server.bind = bind;
        }

        if let Ok(provider_type) = std::env::var("TALKAI_PROVIDER") {
            self.provider.provider_type = provider_type;
        }

        if let Ok(model) = std::env::var("TALKAI_CLAUDE_MODEL") {
            self.provider.claude.model = model;
        }

        if let Ok(api_base) = std::env::var("TALKAI_CLAUDE_API_BASE") {
            self.provider.claude.api_base = Some(api_base);
        }

        // The key is environment-only; TALKAI_ANTHROPIC_API_KEY wins over
        // the conventional ANTHROPIC_API_KEY.
        if let Ok(api_key) = std::env::var("TALKAI_ANTHROPIC_API_KEY") {
            self.provider.claude.api_key = Some(api_key);
        } else if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            self.provider.claude.api_key = Some(api_key);
        }

        if let Ok(limit) = std::env::var("TALKAI_HISTORY_LIMIT") {
            if let Ok(value) = limit.parse() {
                self.chat.history_limit = value;
            } else {
                tracing::warn!("Invalid TALKAI_HISTORY_LIMIT: {}", limit);
            }
        }

        if let Ok(timeout) = std::env::var("TALKAI_COMPLETION_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.chat.completion_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid TALKAI_COMPLETION_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(db_path) = std::env::var("TALKAI_DB_PATH") {
            self.storage.db_path = Some(db_path);
        }

        if let Ok(url) = std::env::var("TALKAI_GOOGLE_USERINFO_URL") {
            self.auth.google.userinfo_url = url;
        }
    }

    /// Validate the configuration before serving
    ///
    /// Missing required values fail here with a descriptive error, before
    /// the listener binds, never as a deferred failure mid-request.
    pub fn validate(&self) -> Result<()> {
        match self.provider.provider_type.as_str() {
            "claude" => {
                if self
                    .provider
                    .claude
                    .api_key
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or("")
                    .is_empty()
                {
                    return Err(TalkaiError::Config(
                        "ANTHROPIC_API_KEY is not set; the chat pipeline cannot serve requests"
                            .to_string(),
                    )
                    .into());
                }
            }
            other => {
                return Err(
                    TalkaiError::Config(format!("Unknown provider type: {}", other)).into(),
                );
            }
        }

        if self.chat.history_limit == 0 {
            return Err(TalkaiError::Config(
                "chat.history_limit must be at least 1".to_string(),
            )
            .into());
        }

        if self.chat.completion_timeout_seconds == 0 {
            return Err(TalkaiError::Config(
                "chat.completion_timeout_seconds must be at least 1".to_string(),
            )
            .into());
        }

        if self.server.bind.trim().is_empty() {
            return Err(TalkaiError::Config("server.bind must not be empty".to_string()).into());
        }

        Ok(())
    }
}

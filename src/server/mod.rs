//! HTTP transport layer
//!
//! Builds the axum router over the chat pipeline and runs the listener
//! with graceful shutdown. All handler state is injected through
//! [`AppState`], so integration tests can drive the router in-process
//! with substituted collaborators.

use crate::auth::GoogleVerifier;
use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::ChatOrchestrator;
use crate::providers;
use crate::storage::{ConversationStore, MessageBus, SqliteStore};

use anyhow::Context as _;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

pub mod error;
pub mod handlers;

pub use error::{ApiError, ApiResult};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ChatOrchestrator>,
    pub store: Arc<dyn ConversationStore>,
    pub bus: Arc<MessageBus>,
    pub auth: Arc<GoogleVerifier>,
    /// Default page size for the history endpoint
    pub fetch_limit: usize,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handlers::chat))
        .route(
            "/api/messages",
            get(handlers::get_messages)
                .post(handlers::post_message)
                .patch(handlers::patch_message)
                .delete(handlers::delete_message),
        )
        .route("/api/messages/watch", get(handlers::watch_messages))
        .route("/api/auth/google", post(handlers::google_auth))
        .with_state(state)
}

/// Wire up the collaborators from configuration
pub fn build_state(config: &Config) -> Result<AppState> {
    let store: Arc<dyn ConversationStore> = match &config.storage.db_path {
        Some(path) => Arc::new(SqliteStore::new_with_path(path)?),
        None => Arc::new(SqliteStore::open_default()?),
    };

    let provider = providers::create_provider(&config.provider)?;
    let bus = Arc::new(MessageBus::new());

    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::clone(&store),
        provider,
        Arc::clone(&bus),
        config.store.clone(),
        config.chat.history_limit,
        Duration::from_secs(config.chat.completion_timeout_seconds),
    ));

    let auth = Arc::new(GoogleVerifier::new(config.auth.google.userinfo_url.as_str())?);

    Ok(AppState {
        orchestrator,
        store,
        bus,
        auth,
        fetch_limit: config.chat.fetch_limit,
    })
}

/// Bind the listener and serve until shutdown
pub async fn serve(config: Config) -> Result<()> {
    let state = build_state(&config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!("Listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when Ctrl+C is pressed
async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

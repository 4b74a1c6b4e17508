//! HTTP handlers for the chat API
//!
//! Wire shapes match the embedded widget: camelCase fields, `{"error"}`
//! bodies on failure, and `data:`-framed JSON events on the streaming
//! endpoints.

use crate::auth::mint_session_token;
use crate::orchestrator::ChatEvent;
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::storage::{MessageUpdate, NewMessage};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Defaults to streaming when unset
    #[serde(default)]
    pub stream: Option<bool>,
    /// Free-form client context (originating URL, user agent), merged
    /// into the conversation metadata
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// `POST /api/chat`: run the chat pipeline, streamed or not
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let session_id = payload.session_id.unwrap_or_default();
    let message = payload.message.unwrap_or_default();

    // Client context rides along with a valid chat turn; an invalid
    // request must not touch the store at all.
    if let Some(context) = payload.context {
        if !session_id.trim().is_empty() && !message.trim().is_empty() {
            state
                .store
                .upsert_conversation(
                    &session_id,
                    crate::storage::ConversationPatch {
                        context: Some(context),
                        ..Default::default()
                    },
                )
                .await?;
        }
    }

    if payload.stream.unwrap_or(true) {
        let events = state
            .orchestrator
            .handle_stream(&session_id, &message)
            .await?;

        let stream = events.map(|event| {
            let payload = match event {
                ChatEvent::Chunk(chunk) => json!({ "chunk": chunk }),
                ChatEvent::Done { message_id } => json!({ "done": true, "messageId": message_id }),
                ChatEvent::Error(error) => json!({ "error": error }),
            };
            Ok::<Event, Infallible>(Event::default().data(payload.to_string()))
        });

        Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let outcome = state.orchestrator.handle(&session_id, &message).await?;

        Ok(Json(json!({
            "success": true,
            "messageId": outcome.message_id,
            "content": outcome.content,
            "tokensUsed": outcome.tokens_used,
        }))
        .into_response())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// `GET /api/messages`: fetch a session's recent messages, oldest first
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Response> {
    let session_id = required(query.session_id, "Missing sessionId parameter")?;
    let limit = query.limit.unwrap_or(state.fetch_limit);

    let messages = state.store.fetch_recent(&session_id, limit).await?;

    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessagePayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<NewMessage>,
}

/// `POST /api/messages`: persist one message of any kind
pub async fn post_message(
    State(state): State<AppState>,
    payload: Result<Json<PostMessagePayload>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let session_id = required(payload.session_id, "Missing sessionId or message data")?;
    let message = payload
        .message
        .ok_or_else(|| ApiError::invalid("Missing sessionId or message data"))?;

    if message.content.trim().is_empty() {
        return Err(ApiError::invalid("Invalid message structure"));
    }

    let stored = state.store.append(&session_id, message).await?;
    state.bus.publish(&session_id, &stored);

    Ok(Json(json!({
        "success": true,
        "messageId": stored.id,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchMessagePayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub updates: Option<MessageUpdate>,
}

/// `PATCH /api/messages`: merge fields into an existing message
pub async fn patch_message(
    State(state): State<AppState>,
    payload: Result<Json<PatchMessagePayload>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let missing = "Missing sessionId, messageId, or updates";
    let session_id = required(payload.session_id, missing)?;
    let message_id = required(payload.message_id, missing)?;
    let updates = payload
        .updates
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::invalid(missing))?;

    state
        .store
        .update_message(&session_id, &message_id, updates)
        .await?;

    Ok(Json(json!({
        "success": true,
        "messageId": message_id,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// `DELETE /api/messages`: administratively delete a message
pub async fn delete_message(
    State(state): State<AppState>,
    Query(query): Query<DeleteMessageQuery>,
) -> ApiResult<Response> {
    let missing = "Missing sessionId or messageId parameter";
    let session_id = required(query.session_id, missing)?;
    let message_id = required(query.message_id, missing)?;

    state.store.delete_message(&session_id, &message_id).await?;

    Ok(Json(json!({
        "success": true,
        "messageId": message_id,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `GET /api/messages/watch`: realtime message subscription over SSE
///
/// Replays the session's recent messages in ascending order, then pushes
/// every subsequent append. Clients that prefer polling simply re-GET
/// `/api/messages` instead.
pub async fn watch_messages(
    State(state): State<AppState>,
    Query(query): Query<WatchQuery>,
) -> ApiResult<Response> {
    let session_id = required(query.session_id, "Missing sessionId parameter")?;

    // Subscribe before the replay fetch so appends landing in between are
    // not lost; the id filter below drops the overlap instead.
    let live = BroadcastStream::new(state.bus.subscribe(&session_id));
    let replay = state
        .store
        .fetch_recent(&session_id, state.fetch_limit)
        .await?;

    // ULIDs sort by creation time, so anything at or below the last
    // replayed id has already been delivered.
    let last_replayed = replay.last().map(|m| m.id.clone()).unwrap_or_default();

    let replay_events = futures::stream::iter(
        replay
            .into_iter()
            .filter_map(|message| serde_json::to_string(&message).ok())
            .map(|data| Event::default().data(data)),
    );

    let live_events = live.filter_map(move |received| {
        let last_replayed = last_replayed.clone();
        async move {
            match received {
                Ok(message) if message.id > last_replayed => {
                    serde_json::to_string(&message)
                        .ok()
                        .map(|data| Event::default().data(data))
                }
                // Duplicates of the replay, or a lagged subscriber that
                // should re-fetch history.
                _ => None,
            }
        }
    });

    let stream = replay_events.chain(live_events).map(Ok::<Event, Infallible>);

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct GoogleAuthPayload {
    #[serde(default)]
    pub token: Option<String>,
}

/// `POST /api/auth/google`: exchange a Google access token for a session
pub async fn google_auth(
    State(state): State<AppState>,
    payload: Result<Json<GoogleAuthPayload>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(payload) = payload?;
    let token = required(payload.token, "Google access token is required")?;

    let user = state.auth.verify(&token).await?;
    tracing::info!(uid = %user.uid, "Google sign-in verified");

    Ok(Json(json!({
        "user": user,
        "customToken": mint_session_token(),
        "message": "Successfully authenticated with Google",
    }))
    .into_response())
}

/// Unwrap a required request field, mapping absence to a 400
fn required(value: Option<String>, message: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::invalid(message))
}

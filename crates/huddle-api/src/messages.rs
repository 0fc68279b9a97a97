use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use huddle_core::Identity;
use huddle_types::api::{AddReactionRequest, MarkReadRequest, MarkReadResponse, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ConversationQuery {
    pub limit: Option<u32>,
    /// Cursor: id of the oldest message the client already has. Only
    /// strictly older messages are returned.
    pub before: Option<Uuid>,
}

/// POST /conversations/{user_id}/messages
///
/// 201 means the message is durable. Any error means it was not stored and
/// the client should keep the draft for retry.
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .coordinator
        .send_message(identity.user_id, receiver_id, req)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /conversations/{user_id}/messages
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Query(query): Query<ConversationQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .coordinator
        .fetch_conversation(identity.user_id, counterpart_id, query.limit, query.before)
        .await?;

    Ok(Json(page))
}

/// POST /messages/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state
        .coordinator
        .mark_read(identity.user_id, req.message_ids)
        .await?;

    Ok(Json(MarkReadResponse { updated }))
}

/// POST /messages/{message_id}/reactions
pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let added = state
        .coordinator
        .add_reaction(identity.user_id, message_id, req.emoji)
        .await?;

    Ok(Json(serde_json::json!({ "added": added })))
}

/// GET /unread-counts
pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.coordinator.unread_counts(identity.user_id).await?))
}

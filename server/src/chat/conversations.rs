//! REST endpoints for a participant's conversation list and per-user flags.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::chat::store;
use crate::db::models::ConversationSummary;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub muted: Option<bool>,
    /// Only `true` has an effect; a deleted conversation is not restored
    pub deleted: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ConversationFlagsResponse {
    pub id: i64,
    pub muted: bool,
}

/// GET /api/conversations
/// Conversations the caller has not deleted, most recent activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<ConversationSummary>>> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let conversations = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        Ok(store::list_conversations(&conn, user_id)?)
    })
    .await
    .map_err(ApiError::task_failed)??;

    Ok(Json(conversations))
}

/// PATCH /api/conversations/{id}
/// Updates the caller's own mute/delete flags. 404 unless the caller takes
/// part in the conversation.
pub async fn update_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Path(conversation_id): Path<i64>,
    JsonBody(body): JsonBody<UpdateConversationRequest>,
) -> ApiResult<Json<ConversationFlagsResponse>> {
    let db = state.db.clone();
    let user_id = claims.user_id;

    let muted = tokio::task::spawn_blocking(move || -> ApiResult<bool> {
        let conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;

        if store::find_conversation_for_participant(&conn, conversation_id, user_id)?.is_none() {
            return Err(ApiError::NotFound("conversation not found".to_string()));
        }

        Ok(store::set_conversation_flags(
            &conn,
            conversation_id,
            user_id,
            body.muted,
            body.deleted,
        )?)
    })
    .await
    .map_err(ApiError::task_failed)??;

    tracing::debug!(
        conversation_id = conversation_id,
        user_id = user_id,
        muted = muted,
        "Conversation flags updated"
    );

    Ok(Json(ConversationFlagsResponse {
        id: conversation_id,
        muted,
    }))
}

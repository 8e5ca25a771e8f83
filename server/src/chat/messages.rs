//! REST endpoints for message history and sending without a WebSocket.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::auth::middleware::Claims;
use crate::chat::send::{send_message, SendMessageRequest};
use crate::chat::store;
use crate::db::models::ChatMessage;
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::state::AppState;
use crate::users;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub with_user: Option<String>,
}

/// GET /api/messages?with_user={id}
/// Every message between the caller and `with_user`, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ChatMessage>>> {
    let raw = query
        .with_user
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("with_user parameter required".to_string()))?;
    let other_id: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::NotFound("user not found".to_string()))?;

    let db = state.db.clone();
    let user_id = claims.user_id;

    let messages = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;

        if users::find_user(&conn, other_id)?.is_none() {
            return Err(ApiError::NotFound("user not found".to_string()));
        }

        Ok(store::list_messages(&conn, user_id, other_id)?)
    })
    .await
    .map_err(ApiError::task_failed)??;

    Ok(Json(messages))
}

/// POST /api/messages
/// Same path as a WebSocket send; the recipient's live connections get the
/// message through the bus. Returns 201 with the stored message.
pub async fn create_message(
    State(state): State<AppState>,
    claims: Claims,
    JsonBody(body): JsonBody<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<ChatMessage>)> {
    let message = send_message(&state, claims.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

//! REST endpoints for the caller's notifications and push devices.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db::models::{Device, Notification};
use crate::error::{ApiError, ApiResult, JsonBody};
use crate::notifications::store;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNotificationRequest {
    pub read: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub registration_id: String,
    pub platform: Option<String>,
}

/// Run a store call for the authenticated user on the blocking pool.
async fn with_store<T, F>(state: &AppState, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Connection) -> ApiResult<T> + Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        f(&conn)
    })
    .await
    .map_err(ApiError::task_failed)?
}

/// GET /api/notifications
/// The caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<Vec<Notification>>> {
    let user_id = claims.user_id;
    let notifications =
        with_store(&state, move |conn| Ok(store::list_notifications(conn, user_id)?)).await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<Json<UnreadCountResponse>> {
    let user_id = claims.user_id;
    let count = with_store(&state, move |conn| Ok(store::unread_count(conn, user_id)?)).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// POST /api/notifications/mark-all-read
pub async fn mark_all_read(State(state): State<AppState>, claims: Claims) -> ApiResult<StatusCode> {
    let user_id = claims.user_id;
    let changed = with_store(&state, move |conn| Ok(store::mark_all_read(conn, user_id)?)).await?;
    tracing::debug!(user_id = user_id, changed = changed, "Notifications marked read");
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/notifications/{id}
/// 404 unless the notification belongs to the caller.
pub async fn update_notification(
    State(state): State<AppState>,
    claims: Claims,
    Path(notification_id): Path<i64>,
    JsonBody(body): JsonBody<UpdateNotificationRequest>,
) -> ApiResult<Json<Notification>> {
    let user_id = claims.user_id;
    let notification = with_store(&state, move |conn| {
        store::set_read(conn, user_id, notification_id, body.read)?
            .ok_or_else(|| ApiError::NotFound("notification not found".to_string()))
    })
    .await?;
    Ok(Json(notification))
}

/// DELETE /api/notifications
pub async fn clear_notifications(
    State(state): State<AppState>,
    claims: Claims,
) -> ApiResult<StatusCode> {
    let user_id = claims.user_id;
    let removed = with_store(&state, move |conn| Ok(store::delete_all(conn, user_id)?)).await?;
    tracing::info!(user_id = user_id, removed = removed, "Notifications cleared");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/devices
/// Register (or refresh) a push registration for the caller.
pub async fn register_device(
    State(state): State<AppState>,
    claims: Claims,
    JsonBody(body): JsonBody<RegisterDeviceRequest>,
) -> ApiResult<Json<Device>> {
    let registration_id = body.registration_id.trim().to_string();
    if registration_id.is_empty() {
        return Err(ApiError::BadRequest("registration_id required".to_string()));
    }

    let user_id = claims.user_id;
    let platform = body.platform.filter(|p| !p.is_empty());
    let device = with_store(&state, move |conn| {
        Ok(store::upsert_device(
            conn,
            user_id,
            &registration_id,
            platform.as_deref(),
        )?)
    })
    .await?;

    tracing::info!(user_id = user_id, device_id = device.id, "Push device registered");
    Ok(Json(device))
}

use axum::{
    extract::{rejection::QueryRejection, ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::auth::{jwt, middleware::bearer_token};
use crate::db::models::UserRef;
use crate::state::AppState;
use crate::users;
use crate::ws::actor;

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Why a handshake was refused.
#[derive(Debug)]
enum AuthRejection {
    MissingToken,
    Expired,
    Invalid,
    UnknownUser(i64),
    Lookup(String),
    Timeout,
}

impl AuthRejection {
    fn reason(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing token",
            Self::Expired => "token expired",
            Self::Invalid => "token invalid",
            Self::UnknownUser(_) => "unknown user",
            Self::Lookup(_) => "user lookup failed",
            Self::Timeout => "authentication timed out",
        }
    }
}

/// GET /ws?token=JWT (or `Authorization: Bearer JWT`)
/// WebSocket upgrade endpoint. The query parameter is checked first; an
/// unparseable query string counts as no token.
/// Authentication completes before the upgrade is accepted; a refused
/// handshake never reaches the actor, so no group is ever joined for it.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    query: Result<Query<WsAuthQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .ok()
        .and_then(|Query(params)| params.token)
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers).map(str::to_string));

    let outcome = match tokio::time::timeout(state.auth_timeout, authenticate(&state, token)).await {
        Ok(result) => result,
        Err(_) => Err(AuthRejection::Timeout),
    };

    match outcome {
        Ok(user) => {
            tracing::info!(user_id = user.id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user))
        }
        Err(rejection) => {
            tracing::warn!(
                reason = rejection.reason(),
                detail = ?rejection,
                "WebSocket auth failed"
            );
            (StatusCode::UNAUTHORIZED, rejection.reason()).into_response()
        }
    }
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<UserRef, AuthRejection> {
    let token = token.ok_or(AuthRejection::MissingToken)?;

    let claims = jwt::validate_access_token(&state.jwt_secret, &token).map_err(|err| {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthRejection::Expired,
            _ => AuthRejection::Invalid,
        }
    })?;

    let db = state.db.clone();
    let user_id = claims.user_id;
    let user = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| "database lock poisoned".to_string())?;
        users::find_user(&conn, user_id).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| AuthRejection::Lookup(e.to_string()))?
    .map_err(AuthRejection::Lookup)?;

    user.ok_or(AuthRejection::UnknownUser(user_id))
}

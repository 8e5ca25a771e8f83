use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, messages};
use crate::notifications::routes as notification_routes;
use crate::state::AppState;
use crate::ws::handler as ws_handler;
use crate::{contracts, properties};

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Chat history, sending, and per-user conversation flags
    let chat_routes = Router::new()
        .route(
            "/api/messages",
            get(messages::list_messages).post(messages::create_message),
        )
        .route("/api/conversations", get(conversations::list_conversations))
        .route(
            "/api/conversations/{id}",
            patch(conversations::update_conversation),
        );

    // Caller-scoped notifications and push registrations
    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            get(notification_routes::list_notifications)
                .delete(notification_routes::clear_notifications),
        )
        .route(
            "/api/notifications/unread-count",
            get(notification_routes::unread_count),
        )
        .route(
            "/api/notifications/mark-all-read",
            post(notification_routes::mark_all_read),
        )
        .route(
            "/api/notifications/{id}",
            patch(notification_routes::update_notification),
        )
        .route("/api/devices", post(notification_routes::register_device));

    // Mutations that raise domain events
    let event_routes = Router::new()
        .route("/api/properties/{id}", patch(properties::update_property))
        .route(
            "/api/properties/{id}/favorite",
            post(properties::favorite_property),
        )
        .route("/api/contracts/{id}/status", post(contracts::set_status))
        .route(
            "/api/contracts/{id}/payment-confirmed",
            post(contracts::payment_confirmed),
        );

    // WebSocket endpoint (token via query param or Authorization header)
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(chat_routes)
        .merge(notification_routes)
        .merge(event_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

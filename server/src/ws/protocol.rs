//! JSON frame protocol spoken on the chat WebSocket.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::chat::send::{self, SendMessageRequest};
use crate::db::models::{ChatMessage, Notification};
use crate::error::ApiError;
use crate::state::AppState;
use crate::ws::actor::OpenConnection;

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A message addressed to this connection's user
    Message { message: ChatMessage },
    /// Confirmation to the sender that its message was stored and forwarded
    MessageSent { message: ChatMessage },
    Error { message: String },
    Notification { notification: Notification },
}

impl ServerFrame {
    pub fn to_ws_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode server frame");
                None
            }
        }
    }
}

/// Frames the client sends, after the `type` tag has been checked.
#[derive(Debug)]
pub enum ClientFrame {
    Message(SendMessageRequest),
}

/// Parse a text frame. `None` for anything that is not a well-formed,
/// supported frame.
pub fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(|t| t.as_str()) {
        Some("message") => serde_json::from_value(value).ok().map(ClientFrame::Message),
        _ => None,
    }
}

/// Handle one inbound text frame to completion.
pub async fn handle_text_message(text: &str, conn: &OpenConnection, state: &AppState) {
    let Some(frame) = parse_client_frame(text) else {
        tracing::debug!(
            user_id = conn.user.id,
            "Ignoring malformed or unsupported frame: {}",
            text.chars().take(100).collect::<String>()
        );
        return;
    };

    match frame {
        ClientFrame::Message(request) => handle_send(request, conn, state).await,
    }
}

async fn handle_send(request: SendMessageRequest, conn: &OpenConnection, state: &AppState) {
    match send::send_message(state, conn.user.id, request).await {
        Ok(message) => {
            conn.send(&ServerFrame::MessageSent { message });
        }
        // Shape problems (no recipient, empty text) are dropped without a reply
        Err(ApiError::BadRequest(reason)) => {
            tracing::debug!(user_id = conn.user.id, reason = %reason, "Dropped invalid chat frame");
        }
        Err(err) => {
            tracing::info!(user_id = conn.user.id, error = %err, "Chat send failed");
            conn.send(&ServerFrame::Error {
                message: err.detail(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_frame() {
        let frame = parse_client_frame(
            r#"{"type":"message","to":2,"text":"hi","message_type":"text"}"#,
        );
        match frame {
            Some(ClientFrame::Message(req)) => {
                assert_eq!(req.recipient_id(), Some(2));
                assert_eq!(req.text.as_deref(), Some("hi"));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_and_malformed_frames_ignored() {
        assert!(parse_client_frame("not json").is_none());
        assert!(parse_client_frame(r#"{"type":"typing","to":2}"#).is_none());
        assert!(parse_client_frame(r#"{"to":2,"text":"no type"}"#).is_none());
    }

    #[test]
    fn test_server_frame_tags() {
        let frame = ServerFrame::Error {
            message: "property not found".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "property not found");
    }
}

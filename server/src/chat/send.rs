//! The message send path shared by the WebSocket consumer and `POST /api/messages`.
//!
//! Steps run in order and fail independently: persist (conversation + message
//! in one transaction), publish to the recipient's group, then hand the
//! recipient notification to the dispatcher. Only the first step can fail the
//! send.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::bus::{BusEvent, GroupName};
use crate::chat::store::{self, NewMessage};
use crate::db::models::{ChatMessage, MESSAGE_TYPE_PROPERTY, MESSAGE_TYPE_TEXT};
use crate::error::{ApiError, ApiResult};
use crate::notifications::dispatcher::NotifyRequest;
use crate::notifications::push::PushMessage;
use crate::properties;
use crate::state::AppState;
use crate::users;

/// Body of a send, from either transport.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageRequest {
    /// Recipient user id, as a number or a numeric string
    pub to: Option<Value>,
    pub text: Option<String>,
    pub message_type: Option<String>,
    pub data: Option<Value>,
}

impl SendMessageRequest {
    pub fn recipient_id(&self) -> Option<i64> {
        self.to.as_ref().and_then(value_as_id)
    }

    /// Declared type, `"text"` when absent or empty.
    pub fn message_type(&self) -> &str {
        self.message_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(MESSAGE_TYPE_TEXT)
    }

    /// `data.imovel_id` when present and not falsy.
    fn property_ref(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .and_then(|d| d.get("imovel_id"))
            .filter(|v| is_truthy(v))
    }
}

fn value_as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Validate, persist and fan out one message from `sender_id`.
///
/// `BadRequest` covers malformed sends (no recipient, empty text, sending to
/// oneself); the WebSocket consumer drops those silently. `NotFound` covers an
/// unknown recipient or property.
pub async fn send_message(
    state: &AppState,
    sender_id: i64,
    request: SendMessageRequest,
) -> ApiResult<ChatMessage> {
    let recipient_id = request
        .recipient_id()
        .ok_or_else(|| ApiError::BadRequest("to required".to_string()))?;

    let message_type = request.message_type().to_string();
    let text = request.text.clone().unwrap_or_default();

    if message_type == MESSAGE_TYPE_TEXT && text.is_empty() {
        return Err(ApiError::BadRequest(
            "text required for message_type=text".to_string(),
        ));
    }
    if recipient_id == sender_id {
        return Err(ApiError::BadRequest("cannot message yourself".to_string()));
    }

    let property_id = match request.property_ref() {
        Some(raw) if message_type == MESSAGE_TYPE_PROPERTY => Some(
            value_as_id(raw).ok_or_else(|| ApiError::NotFound("property not found".to_string()))?,
        ),
        _ => None,
    };

    // An empty object carries nothing worth storing
    let data = request.data.filter(is_truthy);

    let db = state.db.clone();
    let stored_type = message_type.clone();
    let (message, sender_name) = tokio::task::spawn_blocking(move || -> ApiResult<_> {
        let mut conn = db.lock().map_err(|_| ApiError::lock_poisoned())?;
        let tx = conn.transaction()?;

        if let Some(property_id) = property_id {
            if !properties::property_exists(&tx, property_id)? {
                return Err(ApiError::NotFound("property not found".to_string()));
            }
        }

        let recipient = users::find_user(&tx, recipient_id)?
            .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;
        let sender = users::find_user(&tx, sender_id)?.ok_or(ApiError::Unauthorized)?;

        let conversation = store::find_or_create_conversation(&tx, sender.id, recipient.id)?;
        let message = store::create_message(
            &tx,
            &NewMessage {
                conversation_id: Some(conversation.id),
                sender_id: sender.id,
                recipient_id: recipient.id,
                text: &text,
                message_type: &stored_type,
                data: data.as_ref(),
            },
        )?;

        tx.commit()?;
        Ok((message, sender.name))
    })
    .await
    .map_err(ApiError::task_failed)??;

    tracing::info!(
        message_id = message.id,
        conversation_id = ?message.conversation,
        sender_id = sender_id,
        recipient_id = recipient_id,
        message_type = %message.message_type,
        "Message stored"
    );

    state.bus.publish(
        &GroupName::for_user(recipient_id),
        BusEvent::ChatMessage {
            message: message.clone(),
        },
    );

    state
        .notifier
        .notify(chat_notification(&message, &sender_name, property_id));

    Ok(message)
}

/// Notification and push for the recipient of `message`.
fn chat_notification(message: &ChatMessage, sender_name: &str, property_id: Option<i64>) -> NotifyRequest {
    let body = if message.message_type == MESSAGE_TYPE_PROPERTY {
        format!("{} shared a property", sender_name)
    } else {
        format!("{} sent you a message", sender_name)
    };

    let mut data = BTreeMap::new();
    data.insert("type".to_string(), "chat".to_string());
    data.insert("from_user".to_string(), message.sender.id.to_string());
    if let Some(conversation) = message.conversation {
        data.insert("conversation".to_string(), conversation.to_string());
    }
    if let Some(property_id) = property_id {
        data.insert("imovel".to_string(), property_id.to_string());
    }

    NotifyRequest {
        user_id: message.recipient.id,
        message: format!("{} sent you a message", sender_name),
        property_id: None,
        push: Some(PushMessage {
            title: "New message".to_string(),
            body,
            data,
        }),
        live: false,
    }
}

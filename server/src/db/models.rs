/// Database row types.
/// Types that travel over the wire (HTTP bodies, WebSocket frames, bus
/// payloads) derive serde with the exact field names clients expect.
use serde::{Deserialize, Serialize};

/// Message type tag for plain text messages.
pub const MESSAGE_TYPE_TEXT: &str = "text";
/// Message type tag for a shared property listing; `data` carries `imovel_id`.
pub const MESSAGE_TYPE_PROPERTY: &str = "imovel";

/// User as embedded in other payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i64,
    pub name: String,
}

/// Conversation record (participants live in conversation_participants)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub user_low: i64,
    pub user_high: i64,
    pub created_at: String,
}

impl Conversation {
    pub fn has_participant(&self, user_id: i64) -> bool {
        self.user_low == user_id || self.user_high == user_id
    }
}

/// Serialized chat message, identical on HTTP, WebSocket and the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub conversation: Option<i64>,
    pub sender: UserRef,
    pub recipient: UserRef,
    pub text: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Option<serde_json::Value>,
    pub created_at: String,
}

/// One entry of a participant's conversation list
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub participants: Vec<UserRef>,
    pub last_message: Option<String>,
    pub updated_at: String,
    pub muted: bool,
}

/// Durable in-app notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user: i64,
    pub property: Option<i64>,
    pub message: String,
    pub read: bool,
    pub created_at: String,
}

/// Push registration for one of a user's devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: i64,
    pub user_id: i64,
    pub registration_id: String,
    pub platform: Option<String>,
    pub created_at: String,
}

/// Property listing, reduced to the fields the notification flows read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub price_cents: i64,
}

/// Rental contract request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractRequest {
    pub id: i64,
    pub property_id: i64,
    pub requester_id: i64,
    pub status: String,
    pub owner_response: Option<String>,
    pub first_rent_paid: bool,
    pub payment_id: Option<String>,
    pub payment_status: Option<String>,
    pub updated_at: String,
}

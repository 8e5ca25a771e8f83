//! Connection registry and group bus.
//!
//! Every live WebSocket connection joins exactly one group, named after its
//! user (`user_<id>`). Publishing to "the group for user X" therefore needs
//! no lookup. The registry holds the local members of each group; the bus
//! decides how a published event reaches the registry (directly, or through
//! a broker shared by several processes).

pub mod memory;
pub mod redis;

use axum::extract::ws::Message;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{BusBackend, BusConfig};
use crate::db::models::{ChatMessage, Notification};
use crate::ws::protocol::ServerFrame;

/// Sender half of a connection's outbound channel.
/// The connection's writer task owns the receiver and the socket sink.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Identifies one live connection; a user may hold several.
pub type ConnectionId = uuid::Uuid;

/// Allocate a fresh connection id.
pub fn new_connection_id() -> ConnectionId {
    uuid::Uuid::now_v7()
}

/// Name of a multicast destination on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupName(String);

impl GroupName {
    /// The group every connection of `user_id` joins.
    pub fn for_user(user_id: i64) -> Self {
        Self(format!("user_{}", user_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuild a group name received from a broker channel.
    pub(crate) fn from_wire(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event published to a group. Serialized as-is when it crosses processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BusEvent {
    #[serde(rename = "chat.message")]
    ChatMessage { message: ChatMessage },
    #[serde(rename = "notification")]
    Notification { notification: Notification },
}

impl BusEvent {
    /// The frame a member connection receives for this event.
    pub fn to_frame(&self) -> ServerFrame {
        match self {
            BusEvent::ChatMessage { message } => ServerFrame::Message {
                message: message.clone(),
            },
            BusEvent::Notification { notification } => ServerFrame::Notification {
                notification: notification.clone(),
            },
        }
    }
}

/// Local group membership: group -> live connections in this process.
#[derive(Default)]
pub struct ConnectionRegistry {
    groups: DashMap<GroupName, Vec<(ConnectionId, ConnectionSender)>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, group: &GroupName, connection_id: ConnectionId, tx: ConnectionSender) {
        let mut members = self.groups.entry(group.clone()).or_default();
        members.retain(|(id, _)| *id != connection_id);
        members.push((connection_id, tx));

        tracing::debug!(
            group = %group,
            connection_id = %connection_id,
            members = members.len(),
            "Connection joined group"
        );
    }

    /// Remove a connection from a group. Safe to call for a connection that
    /// never joined or already left.
    pub fn leave(&self, group: &GroupName, connection_id: ConnectionId) -> bool {
        let mut removed = false;
        let mut now_empty = false;

        if let Some(mut members) = self.groups.get_mut(group) {
            let before = members.len();
            members.retain(|(id, _)| *id != connection_id);
            removed = members.len() != before;
            now_empty = members.is_empty();
        }

        if now_empty {
            self.groups.remove_if(group, |_, members| members.is_empty());
        }

        if removed {
            tracing::debug!(group = %group, connection_id = %connection_id, "Connection left group");
        }
        removed
    }

    pub fn member_count(&self, group: &GroupName) -> usize {
        self.groups.get(group).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_member(&self, group: &GroupName, connection_id: ConnectionId) -> bool {
        self.groups
            .get(group)
            .map(|m| m.iter().any(|(id, _)| *id == connection_id))
            .unwrap_or(false)
    }

    /// Fan an event out to every current member of `group`.
    /// Returns how many connections accepted it. A member whose writer has
    /// already gone away is skipped.
    pub fn deliver(&self, group: &GroupName, event: &BusEvent) -> usize {
        let Some(members) = self.groups.get(group) else {
            return 0;
        };

        let Some(msg) = event.to_frame().to_ws_message() else {
            return 0;
        };

        members
            .iter()
            .filter(|(_, tx)| tx.send(msg.clone()).is_ok())
            .count()
    }
}

/// Publish/subscribe fabric keyed by group name.
///
/// `publish` never waits for delivery. Within one group, events published by
/// one caller reach members in publish order.
pub trait GroupBus: Send + Sync {
    /// Members hosted by this process.
    fn registry(&self) -> &ConnectionRegistry;

    fn join(&self, group: &GroupName, connection_id: ConnectionId, tx: ConnectionSender) {
        self.registry().join(group, connection_id, tx);
    }

    fn leave(&self, group: &GroupName, connection_id: ConnectionId) {
        self.registry().leave(group, connection_id);
    }

    fn publish(&self, group: &GroupName, event: BusEvent);
}

pub type SharedBus = Arc<dyn GroupBus>;

/// Build the bus selected by configuration. Must be called inside a tokio
/// runtime: the Redis fabric spawns its broker task here.
pub fn build_bus(config: &BusConfig) -> SharedBus {
    match config.backend {
        BusBackend::Memory => {
            tracing::info!("Group bus: in-memory");
            Arc::new(memory::MemoryBus::new())
        }
        BusBackend::Redis => {
            tracing::info!(url = %config.redis_url, prefix = %config.channel_prefix, "Group bus: redis");
            Arc::new(self::redis::RedisBus::spawn(
                config.redis_url.clone(),
                config.channel_prefix.clone(),
            ))
        }
    }
}

//! Conversation and message persistence.
//!
//! A conversation is stored once per unordered user pair: `user_low` holds
//! the smaller id. The unique index on the pair plus `INSERT OR IGNORE` makes
//! concurrent find-or-create calls converge on one row.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::models::{ChatMessage, Conversation, ConversationSummary, UserRef};
use crate::db::now_timestamp;

/// Order a participant pair so the smaller id comes first.
pub fn normalize_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_low: row.get(1)?,
        user_high: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Conversation between exactly `a` and `b`, if one exists.
pub fn find_conversation(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Option<Conversation>> {
    let (low, high) = normalize_pair(a, b);
    conn.query_row(
        "SELECT id, user_low, user_high, created_at FROM conversations
         WHERE user_low = ?1 AND user_high = ?2",
        rusqlite::params![low, high],
        conversation_from_row,
    )
    .optional()
}

/// Look up the conversation for `{a, b}`, creating it (and both participant
/// rows) when missing. Argument order does not matter.
pub fn find_or_create_conversation(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Conversation> {
    let (low, high) = normalize_pair(a, b);

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations (user_low, user_high, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![low, high, now_timestamp()],
    )?;

    let conversation = conn.query_row(
        "SELECT id, user_low, user_high, created_at FROM conversations
         WHERE user_low = ?1 AND user_high = ?2",
        rusqlite::params![low, high],
        conversation_from_row,
    )?;

    for user_id in [low, high] {
        conn.execute(
            "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
            rusqlite::params![conversation.id, user_id],
        )?;
    }

    if inserted > 0 {
        tracing::debug!(
            conversation_id = conversation.id,
            user_low = low,
            user_high = high,
            "Conversation created"
        );
    }

    Ok(conversation)
}

/// Fields of a message about to be stored.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub conversation_id: Option<i64>,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub text: &'a str,
    pub message_type: &'a str,
    pub data: Option<&'a serde_json::Value>,
}

/// Append a message and return it as serialized to clients.
pub fn create_message(conn: &Connection, new: &NewMessage<'_>) -> rusqlite::Result<ChatMessage> {
    let data = new.data.map(|d| d.to_string());

    conn.execute(
        "INSERT INTO messages (conversation_id, sender_id, recipient_id, text, message_type, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            new.conversation_id,
            new.sender_id,
            new.recipient_id,
            new.text,
            new.message_type,
            data,
            now_timestamp(),
        ],
    )?;

    let id = conn.last_insert_rowid();
    get_message(conn, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

const MESSAGE_COLUMNS: &str =
    "m.id, m.conversation_id, m.sender_id, s.name, m.recipient_id, r.name,
     m.text, m.message_type, m.data, m.created_at
     FROM messages m
     JOIN users s ON s.id = m.sender_id
     JOIN users r ON r.id = m.recipient_id";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let data: Option<String> = row.get(8)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        conversation: row.get(1)?,
        sender: UserRef {
            id: row.get(2)?,
            name: row.get(3)?,
        },
        recipient: UserRef {
            id: row.get(4)?,
            name: row.get(5)?,
        },
        text: row.get(6)?,
        message_type: row.get(7)?,
        data: data.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: row.get(9)?,
    })
}

pub fn get_message(conn: &Connection, message_id: i64) -> rusqlite::Result<Option<ChatMessage>> {
    conn.query_row(
        &format!("SELECT {} WHERE m.id = ?1", MESSAGE_COLUMNS),
        rusqlite::params![message_id],
        message_from_row,
    )
    .optional()
}

/// Every message between `a` and `b`, oldest first.
///
/// Reads the pair's conversation when there is one; otherwise falls back to
/// direct sender/recipient matches, which covers messages stored before
/// conversations existed.
pub fn list_messages(conn: &Connection, a: i64, b: i64) -> rusqlite::Result<Vec<ChatMessage>> {
    if let Some(conversation) = find_conversation(conn, a, b)? {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} WHERE m.conversation_id = ?1 ORDER BY m.created_at ASC, m.id ASC",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(rusqlite::params![conversation.id], message_from_row)?;
        return rows.collect();
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {}
         WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
            OR (m.sender_id = ?2 AND m.recipient_id = ?1)
         ORDER BY m.created_at ASC, m.id ASC",
        MESSAGE_COLUMNS
    ))?;
    let rows = stmt.query_map(rusqlite::params![a, b], message_from_row)?;
    rows.collect()
}

/// Conversations visible to `user_id`, most recent activity first.
pub fn list_conversations(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<ConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.created_at, p.muted,
                ul.id, ul.name, uh.id, uh.name,
                (SELECT text FROM messages
                  WHERE conversation_id = c.id
                  ORDER BY created_at DESC, id DESC LIMIT 1) AS last_text,
                (SELECT created_at FROM messages
                  WHERE conversation_id = c.id
                  ORDER BY created_at DESC, id DESC LIMIT 1) AS last_at
         FROM conversations c
         JOIN conversation_participants p ON p.conversation_id = c.id AND p.user_id = ?1
         JOIN users ul ON ul.id = c.user_low
         JOIN users uh ON uh.id = c.user_high
         WHERE p.deleted = 0
         ORDER BY COALESCE(last_at, c.created_at) DESC, c.id DESC",
    )?;

    let rows = stmt.query_map(rusqlite::params![user_id], |row| {
        let created_at: String = row.get(1)?;
        let last_at: Option<String> = row.get(8)?;
        Ok(ConversationSummary {
            id: row.get(0)?,
            muted: row.get(2)?,
            participants: vec![
                UserRef {
                    id: row.get(3)?,
                    name: row.get(4)?,
                },
                UserRef {
                    id: row.get(5)?,
                    name: row.get(6)?,
                },
            ],
            last_message: row.get(7)?,
            updated_at: last_at.unwrap_or(created_at),
        })
    })?;

    rows.collect()
}

/// Conversation `conversation_id` if `user_id` takes part in it.
pub fn find_conversation_for_participant(
    conn: &Connection,
    conversation_id: i64,
    user_id: i64,
) -> rusqlite::Result<Option<Conversation>> {
    let conversation = conn
        .query_row(
            "SELECT id, user_low, user_high, created_at FROM conversations WHERE id = ?1",
            rusqlite::params![conversation_id],
            conversation_from_row,
        )
        .optional()?;

    Ok(conversation.filter(|c| c.has_participant(user_id)))
}

/// Update the caller's own flags on a conversation and return the resulting
/// mute state. `muted` toggles either way; `deleted` only ever sets.
pub fn set_conversation_flags(
    conn: &Connection,
    conversation_id: i64,
    user_id: i64,
    muted: Option<bool>,
    deleted: Option<bool>,
) -> rusqlite::Result<bool> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_participants (conversation_id, user_id) VALUES (?1, ?2)",
        rusqlite::params![conversation_id, user_id],
    )?;

    if let Some(muted) = muted {
        conn.execute(
            "UPDATE conversation_participants SET muted = ?3
             WHERE conversation_id = ?1 AND user_id = ?2",
            rusqlite::params![conversation_id, user_id, muted],
        )?;
    }

    if deleted == Some(true) {
        conn.execute(
            "UPDATE conversation_participants SET deleted = 1
             WHERE conversation_id = ?1 AND user_id = ?2",
            rusqlite::params![conversation_id, user_id],
        )?;
    }

    conn.query_row(
        "SELECT muted FROM conversation_participants WHERE conversation_id = ?1 AND user_id = ?2",
        rusqlite::params![conversation_id, user_id],
        |row| row.get(0),
    )
}

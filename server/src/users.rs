//! User lookups. Accounts are owned by the surrounding marketplace; this
//! server only needs ids and display names.

use rusqlite::{Connection, OptionalExtension};

use crate::db::models::UserRef;
use crate::db::now_timestamp;

/// Insert a user and return its id.
pub fn create_user(conn: &Connection, name: &str, email: Option<&str>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO users (name, email, created_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![name, email, now_timestamp()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Look up a user by id.
pub fn find_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<UserRef>> {
    conn.query_row(
        "SELECT id, name FROM users WHERE id = ?1",
        rusqlite::params![user_id],
        |row| {
            Ok(UserRef {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .optional()
}

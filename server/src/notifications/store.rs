//! Notification records and push device registrations.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::db::models::{Device, Notification};
use crate::db::now_timestamp;

const NOTIFICATION_COLUMNS: &str = "id, user_id, property_id, message, read, created_at";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user: row.get(1)?,
        property: row.get(2)?,
        message: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn create_notification(
    conn: &Connection,
    user_id: i64,
    message: &str,
    property_id: Option<i64>,
) -> rusqlite::Result<Notification> {
    conn.execute(
        "INSERT INTO notifications (user_id, property_id, message, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, property_id, message, now_timestamp()],
    )?;

    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
        rusqlite::params![id],
        notification_from_row,
    )
}

/// A user's notifications, newest first.
pub fn list_notifications(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
        NOTIFICATION_COLUMNS
    ))?;
    let rows = stmt.query_map(rusqlite::params![user_id], notification_from_row)?;
    rows.collect()
}

pub fn unread_count(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
        rusqlite::params![user_id],
        |row| row.get(0),
    )
}

/// Returns how many notifications changed.
pub fn mark_all_read(conn: &Connection, user_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
        rusqlite::params![user_id],
    )
}

/// Set the read flag on one of `user_id`'s notifications. `None` when the
/// notification does not exist or belongs to someone else.
pub fn set_read(
    conn: &Connection,
    user_id: i64,
    notification_id: i64,
    read: bool,
) -> rusqlite::Result<Option<Notification>> {
    let changed = conn.execute(
        "UPDATE notifications SET read = ?3 WHERE id = ?1 AND user_id = ?2",
        rusqlite::params![notification_id, user_id, read],
    )?;
    if changed == 0 {
        return Ok(None);
    }

    conn.query_row(
        &format!("SELECT {} FROM notifications WHERE id = ?1", NOTIFICATION_COLUMNS),
        rusqlite::params![notification_id],
        notification_from_row,
    )
    .optional()
}

pub fn delete_all(conn: &Connection, user_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM notifications WHERE user_id = ?1",
        rusqlite::params![user_id],
    )
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        user_id: row.get(1)?,
        registration_id: row.get(2)?,
        platform: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Register a device for push, or refresh its platform if already known.
pub fn upsert_device(
    conn: &Connection,
    user_id: i64,
    registration_id: &str,
    platform: Option<&str>,
) -> rusqlite::Result<Device> {
    conn.execute(
        "INSERT INTO devices (user_id, registration_id, platform, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (user_id, registration_id)
         DO UPDATE SET platform = COALESCE(excluded.platform, devices.platform)",
        rusqlite::params![user_id, registration_id, platform, now_timestamp()],
    )?;

    conn.query_row(
        "SELECT id, user_id, registration_id, platform, created_at FROM devices
         WHERE user_id = ?1 AND registration_id = ?2",
        rusqlite::params![user_id, registration_id],
        device_from_row,
    )
}

pub fn list_devices(conn: &Connection, user_id: i64) -> rusqlite::Result<Vec<Device>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, registration_id, platform, created_at FROM devices
         WHERE user_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(rusqlite::params![user_id], device_from_row)?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_db;
    use crate::users::create_user;

    #[test]
    fn test_notifications_scoped_to_user() {
        let db = init_memory_db().unwrap();
        let conn = db.lock().unwrap();
        let a = create_user(&conn, "Ana", None).unwrap();
        let b = create_user(&conn, "Bruno", None).unwrap();

        let first = create_notification(&conn, a, "first", None).unwrap();
        create_notification(&conn, a, "second", None).unwrap();
        create_notification(&conn, b, "other", None).unwrap();

        let listed = list_notifications(&conn, a).unwrap();
        let texts: Vec<&str> = listed.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
        assert_eq!(unread_count(&conn, a).unwrap(), 2);

        // Someone else's notification cannot be touched
        assert!(set_read(&conn, b, first.id, true).unwrap().is_none());
        let updated = set_read(&conn, a, first.id, true).unwrap().unwrap();
        assert!(updated.read);
        assert_eq!(unread_count(&conn, a).unwrap(), 1);

        assert_eq!(mark_all_read(&conn, a).unwrap(), 1);
        assert_eq!(unread_count(&conn, a).unwrap(), 0);
        assert_eq!(unread_count(&conn, b).unwrap(), 1);

        assert_eq!(delete_all(&conn, a).unwrap(), 2);
        assert!(list_notifications(&conn, a).unwrap().is_empty());
        assert_eq!(list_notifications(&conn, b).unwrap().len(), 1);
    }

    #[test]
    fn test_device_upsert_keeps_one_row() {
        let db = init_memory_db().unwrap();
        let conn = db.lock().unwrap();
        let a = create_user(&conn, "Ana", None).unwrap();

        let first = upsert_device(&conn, a, "token-1", Some("android")).unwrap();
        let again = upsert_device(&conn, a, "token-1", None).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.platform.as_deref(), Some("android"));

        upsert_device(&conn, a, "token-2", Some("ios")).unwrap();
        assert_eq!(list_devices(&conn, a).unwrap().len(), 2);
    }
}

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{new_id, ts, ts_col};
use crate::domain::{NotificationStatus, NotificationType};

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: String,
    #[serde(skip)]
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub status: NotificationStatus,
    pub title: String,
    pub message: String,
    pub related_id: Option<String>,
    pub action_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

const COLUMNS: &str =
    "id, user_id, type, status, title, message, related_id, action_url, created_at";

fn map_notification(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        status: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        related_id: row.get(6)?,
        action_url: row.get(7)?,
        created_at: ts_col(row, 8)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub kind: NotificationType,
    pub status: NotificationStatus,
    pub title: &'a str,
    pub message: &'a str,
    pub related_id: Option<&'a str>,
    pub action_url: Option<&'a str>,
}

pub fn insert(conn: &Connection, new: &NewNotification<'_>) -> rusqlite::Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO notifications (id, user_id, type, status, title, message, related_id, action_url, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            new.user_id,
            new.kind,
            new.status,
            new.title,
            new.message,
            new.related_id,
            new.action_url,
            ts(Utc::now())
        ],
    )?;
    Ok(id)
}

/// Rewrite the oldest notification keyed by `(user, related_id, type)`, or
/// insert one when none exists. Returns the notification id.
pub fn upsert(conn: &Connection, new: &NewNotification<'_>) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM notifications
             WHERE user_id = ?1 AND related_id IS ?2 AND type = ?3
             ORDER BY created_at, rowid LIMIT 1",
            params![new.user_id, new.related_id, new.kind],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE notifications SET title = ?2, message = ?3, status = ?4 WHERE id = ?1",
                params![id, new.title, new.message, new.status],
            )?;
            Ok(id)
        }
        None => insert(conn, new),
    }
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Notification>> {
    conn.query_row(
        &format!("SELECT {} FROM notifications WHERE id = ?1", COLUMNS),
        [id],
        map_notification,
    )
    .optional()
}

pub fn list_for_user(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        COLUMNS
    ))?;
    let rows = stmt.query_map(params![user_id, limit], map_notification)?;
    rows.collect()
}

/// Every notification for a user tied to `related_id`, any type.
pub fn for_related(
    conn: &Connection,
    user_id: &str,
    related_id: &str,
) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE user_id = ?1 AND related_id = ?2
         ORDER BY created_at, rowid",
        COLUMNS
    ))?;
    let rows = stmt.query_map([user_id, related_id], map_notification)?;
    rows.collect()
}

pub fn unread_count(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND status = ?2",
        params![user_id, NotificationStatus::Unread],
        |row| row.get(0),
    )
}

pub fn set_status(conn: &Connection, id: &str, status: NotificationStatus) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE notifications SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(())
}

pub fn mark_all_read(conn: &Connection, user_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET status = ?2 WHERE user_id = ?1 AND status = ?3",
        params![user_id, NotificationStatus::Read, NotificationStatus::Unread],
    )
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM notifications WHERE id = ?1", [id])?;
    Ok(())
}

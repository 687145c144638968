use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{new_id, opt_ts_col, ts, ts_col};
use crate::domain::JoinRequestStatus;

#[derive(Debug, Clone, Serialize)]
pub struct JoinRequest {
    pub id: String,
    pub email: String,
    pub team: String,
    pub team_name: String,
    pub user: Option<String>,
    pub message: Option<String>,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

const SELECT: &str = "SELECT r.id, r.email, r.team_id, t.name, r.user_id, r.message, r.status,
        r.created_at, r.processed_by, r.processed_at
     FROM team_join_requests r JOIN teams t ON t.id = r.team_id";

fn map_request(row: &Row<'_>) -> rusqlite::Result<JoinRequest> {
    Ok(JoinRequest {
        id: row.get(0)?,
        email: row.get(1)?,
        team: row.get(2)?,
        team_name: row.get(3)?,
        user: row.get(4)?,
        message: row.get(5)?,
        status: row.get(6)?,
        created_at: ts_col(row, 7)?,
        processed_by: row.get(8)?,
        processed_at: opt_ts_col(row, 9)?,
    })
}

pub fn insert(
    conn: &Connection,
    team_id: &str,
    email: &str,
    user_id: Option<&str>,
    message: Option<&str>,
) -> rusqlite::Result<JoinRequest> {
    let id = new_id();
    conn.execute(
        "INSERT INTO team_join_requests (id, email, team_id, user_id, message, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            email,
            team_id,
            user_id,
            message,
            JoinRequestStatus::Pending,
            ts(Utc::now())
        ],
    )?;
    conn.query_row(&format!("{} WHERE r.id = ?1", SELECT), [&id], map_request)
}

pub fn get(conn: &Connection, team_id: &str, id: &str) -> rusqlite::Result<Option<JoinRequest>> {
    conn.query_row(
        &format!("{} WHERE r.team_id = ?1 AND r.id = ?2", SELECT),
        [team_id, id],
        map_request,
    )
    .optional()
}

pub fn pending_exists(conn: &Connection, team_id: &str, email: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM team_join_requests
         WHERE team_id = ?1 AND email = ?2 COLLATE NOCASE AND status = ?3)",
        params![team_id, email, JoinRequestStatus::Pending],
        |row| row.get(0),
    )
}

pub fn pending_for_team(conn: &Connection, team_id: &str) -> rusqlite::Result<Vec<JoinRequest>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE r.team_id = ?1 AND r.status = ?2 ORDER BY r.created_at DESC, r.rowid DESC",
        SELECT
    ))?;
    let rows = stmt.query_map(params![team_id, JoinRequestStatus::Pending], map_request)?;
    rows.collect()
}

pub fn mark_processed(
    conn: &Connection,
    id: &str,
    status: JoinRequestStatus,
    processed_by: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE team_join_requests SET status = ?2, processed_by = ?3, processed_at = ?4 WHERE id = ?1",
        params![id, status, processed_by, ts(Utc::now())],
    )?;
    Ok(())
}

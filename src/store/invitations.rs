use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::{new_id, ts, ts_col};
use crate::domain::{InvitationStatus, TeamRole};

#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub id: String,
    pub email: String,
    pub team: String,
    pub team_name: String,
    pub invited_by: String,
    pub invited_by_name: String,
    pub invited_by_email: String,
    #[serde(skip)]
    pub token: String,
    pub role: TeamRole,
    pub status: InvitationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn inviter_display(&self) -> &str {
        if self.invited_by_name.is_empty() {
            &self.invited_by_email
        } else {
            &self.invited_by_name
        }
    }
}

const SELECT: &str = "SELECT i.id, i.email, i.team_id, t.name, i.invited_by,
        TRIM(u.first_name || ' ' || u.last_name), u.email, i.token, i.role, i.status,
        i.created_at, i.expires_at
     FROM team_invitations i
     JOIN teams t ON t.id = i.team_id
     JOIN users u ON u.id = i.invited_by";

fn map_invitation(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        email: row.get(1)?,
        team: row.get(2)?,
        team_name: row.get(3)?,
        invited_by: row.get(4)?,
        invited_by_name: row.get(5)?,
        invited_by_email: row.get(6)?,
        token: row.get(7)?,
        role: row.get(8)?,
        status: row.get(9)?,
        created_at: ts_col(row, 10)?,
        expires_at: ts_col(row, 11)?,
    })
}

pub struct NewInvitation<'a> {
    pub email: &'a str,
    pub team_id: &'a str,
    pub invited_by: &'a str,
    pub token: &'a str,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn insert(conn: &Connection, new: &NewInvitation<'_>) -> rusqlite::Result<Invitation> {
    let id = new_id();
    conn.execute(
        "INSERT INTO team_invitations (id, email, team_id, invited_by, token, role, status, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            new.email,
            new.team_id,
            new.invited_by,
            new.token,
            new.role,
            InvitationStatus::Pending,
            ts(new.created_at),
            ts(new.expires_at)
        ],
    )?;
    conn.query_row(&format!("{} WHERE i.id = ?1", SELECT), [&id], map_invitation)
}

pub fn by_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<Invitation>> {
    conn.query_row(&format!("{} WHERE i.token = ?1", SELECT), [token], map_invitation)
        .optional()
}

/// Pending, unexpired invitation for this email and team.
pub fn live_pending(
    conn: &Connection,
    team_id: &str,
    email: &str,
    now: DateTime<Utc>,
) -> rusqlite::Result<Option<Invitation>> {
    conn.query_row(
        &format!(
            "{} WHERE i.team_id = ?1 AND i.email = ?2 COLLATE NOCASE AND i.status = ?3
             AND i.expires_at >= ?4 ORDER BY i.created_at DESC LIMIT 1",
            SELECT
        ),
        params![team_id, email, InvitationStatus::Pending, ts(now)],
        map_invitation,
    )
    .optional()
}

/// All pending invitations addressed to an email, newest first. Expired ones
/// are included so callers can transition them.
pub fn pending_for_email(conn: &Connection, email: &str) -> rusqlite::Result<Vec<Invitation>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE i.email = ?1 COLLATE NOCASE AND i.status = ?2
         ORDER BY i.created_at DESC, i.rowid DESC",
        SELECT
    ))?;
    let rows = stmt.query_map(params![email, InvitationStatus::Pending], map_invitation)?;
    rows.collect()
}

pub fn set_status(conn: &Connection, id: &str, status: InvitationStatus) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE team_invitations SET status = ?2 WHERE id = ?1",
        params![id, status],
    )?;
    Ok(())
}

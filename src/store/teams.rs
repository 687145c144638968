use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::users::{UserSummary, SUMMARY_COLUMNS};
use crate::db::{json_col, new_id, ts, ts_col};
use crate::domain::TeamRole;

#[derive(Debug, Clone, Serialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    #[serde(skip)]
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TEAM_COLUMNS: &str = "id, name, description, created_by, settings, created_at, updated_at";

fn map_team(row: &Row<'_>) -> rusqlite::Result<Team> {
    Ok(Team {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        settings: json_col(row, 4)?,
        created_at: ts_col(row, 5)?,
        updated_at: ts_col(row, 6)?,
    })
}

pub fn insert_team(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    created_by: &str,
) -> rusqlite::Result<Team> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO teams (id, name, description, created_by, settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)",
        params![id, name, description, created_by, now],
    )?;
    conn.query_row(
        &format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLUMNS),
        [&id],
        map_team,
    )
}

pub fn get_team(conn: &Connection, id: &str) -> rusqlite::Result<Option<Team>> {
    conn.query_row(
        &format!("SELECT {} FROM teams WHERE id = ?1", TEAM_COLUMNS),
        [id],
        map_team,
    )
    .optional()
}

pub fn update_team(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    description: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE teams SET name = COALESCE(?2, name), description = COALESCE(?3, description),
         updated_at = ?4 WHERE id = ?1",
        params![id, name, description, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn set_settings(conn: &Connection, id: &str, settings: &Value) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE teams SET settings = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, settings.to_string(), ts(Utc::now())],
    )?;
    Ok(())
}

pub fn set_created_by(conn: &Connection, id: &str, user_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE teams SET created_by = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, user_id, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn delete_team(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM teams WHERE id = ?1", [id])?;
    Ok(())
}

/// Teams where the user holds an active membership, newest first.
pub fn teams_for_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Team>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.description, t.created_by, t.settings, t.created_at, t.updated_at
         FROM teams t JOIN team_members m ON m.team_id = t.id
         WHERE m.user_id = ?1 AND m.is_active = 1
         ORDER BY t.created_at DESC, t.rowid DESC",
    )?;
    let rows = stmt.query_map([user_id], map_team)?;
    rows.collect()
}

// --- Membership ---

#[derive(Debug, Clone)]
pub struct Membership {
    pub id: String,
    pub user_id: String,
    pub team_id: String,
    pub role: TeamRole,
    pub is_active: bool,
}

fn map_membership(row: &Row<'_>) -> rusqlite::Result<Membership> {
    Ok(Membership {
        id: row.get(0)?,
        user_id: row.get(1)?,
        team_id: row.get(2)?,
        role: row.get(3)?,
        is_active: row.get(4)?,
    })
}

/// Membership row for the pair, active or not.
pub fn membership(
    conn: &Connection,
    team_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<Membership>> {
    conn.query_row(
        "SELECT id, user_id, team_id, role, is_active FROM team_members
         WHERE team_id = ?1 AND user_id = ?2",
        [team_id, user_id],
        map_membership,
    )
    .optional()
}

pub fn member_by_id(
    conn: &Connection,
    team_id: &str,
    member_id: &str,
) -> rusqlite::Result<Option<Membership>> {
    conn.query_row(
        "SELECT id, user_id, team_id, role, is_active FROM team_members
         WHERE team_id = ?1 AND id = ?2",
        [team_id, member_id],
        map_membership,
    )
    .optional()
}

pub fn active_role(
    conn: &Connection,
    team_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<TeamRole>> {
    conn.query_row(
        "SELECT role FROM team_members WHERE team_id = ?1 AND user_id = ?2 AND is_active = 1",
        [team_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn email_is_member(conn: &Connection, team_id: &str, email: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM team_members m JOIN users u ON u.id = m.user_id
            WHERE m.team_id = ?1 AND m.is_active = 1 AND u.email = ?2 COLLATE NOCASE)",
        [team_id, email],
        |row| row.get(0),
    )
}

/// Insert a membership, or reactivate an existing row with the new role.
pub fn add_member(
    conn: &Connection,
    team_id: &str,
    user_id: &str,
    role: TeamRole,
) -> rusqlite::Result<()> {
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO team_members (id, user_id, team_id, role, joined_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)
         ON CONFLICT (user_id, team_id) DO UPDATE SET
            role = excluded.role, is_active = 1, joined_at = excluded.joined_at",
        params![new_id(), user_id, team_id, role, now],
    )?;
    Ok(())
}

pub fn set_member_role(conn: &Connection, member_id: &str, role: TeamRole) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE team_members SET role = ?2 WHERE id = ?1",
        params![member_id, role],
    )?;
    Ok(())
}

pub fn delete_member(conn: &Connection, member_id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM team_members WHERE id = ?1", [member_id])?;
    Ok(())
}

pub fn member_count(conn: &Connection, team_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM team_members WHERE team_id = ?1 AND is_active = 1",
        [team_id],
        |row| row.get(0),
    )
}

/// Distinct active members across every team the user is active in,
/// the user included.
pub fn teammate_count(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(DISTINCT m.user_id) FROM team_members m
         WHERE m.is_active = 1 AND m.team_id IN
            (SELECT team_id FROM team_members WHERE user_id = ?1 AND is_active = 1)",
        [user_id],
        |row| row.get(0),
    )
}

/// User ids of active members, optionally restricted to Owner/Admin.
pub fn member_user_ids(
    conn: &Connection,
    team_id: &str,
    managers_only: bool,
) -> rusqlite::Result<Vec<String>> {
    let sql = if managers_only {
        "SELECT user_id FROM team_members WHERE team_id = ?1 AND is_active = 1 AND role IN (1, 2)
         ORDER BY joined_at"
    } else {
        "SELECT user_id FROM team_members WHERE team_id = ?1 AND is_active = 1 ORDER BY joined_at"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([team_id], |row| row.get(0))?;
    rows.collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub id: String,
    pub user: UserSummary,
    pub role: TeamRole,
    pub role_display: &'static str,
    pub joined_at: DateTime<Utc>,
    pub is_active: bool,
}

fn map_member_view(row: &Row<'_>) -> rusqlite::Result<MemberView> {
    let role: TeamRole = row.get(1)?;
    Ok(MemberView {
        id: row.get(0)?,
        role,
        role_display: role.label(),
        joined_at: ts_col(row, 2)?,
        is_active: row.get(3)?,
        user: UserSummary::from_row(row, 4)?,
    })
}

#[derive(Debug, Default)]
pub struct MemberFilter<'a> {
    /// Case-insensitive match on email, first or last name.
    pub query: Option<&'a str>,
    pub role: Option<TeamRole>,
}

/// Active members ordered by role then join date. Returns the page and the
/// total count before paging.
pub fn list_members(
    conn: &Connection,
    team_id: &str,
    filter: &MemberFilter<'_>,
    limit: Option<(i64, i64)>,
) -> rusqlite::Result<(Vec<MemberView>, i64)> {
    let mut clauses = vec!["m.team_id = ?".to_string(), "m.is_active = 1".to_string()];
    let mut args: Vec<rusqlite::types::Value> = vec![team_id.to_string().into()];

    if let Some(q) = filter.query.map(str::trim).filter(|q| !q.is_empty()) {
        clauses.push(
            "(u.email LIKE ? ESCAPE '\\' OR u.first_name LIKE ? ESCAPE '\\' OR u.last_name LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = format!("%{}%", escape_like(q));
        for _ in 0..3 {
            args.push(pattern.clone().into());
        }
    }
    if let Some(role) = filter.role {
        clauses.push("m.role = ?".to_string());
        args.push(role.code().into());
    }

    let from = format!(
        "FROM team_members m JOIN users u ON u.id = m.user_id WHERE {}",
        clauses.join(" AND ")
    );

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) {}", from),
        params_from_iter(args.iter()),
        |row| row.get(0),
    )?;

    let mut sql = format!(
        "SELECT m.id, m.role, m.joined_at, m.is_active, {} {} ORDER BY m.role, m.joined_at, m.rowid",
        SUMMARY_COLUMNS, from
    );
    if let Some((limit, offset)) = limit {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_member_view)?;
    Ok((rows.collect::<rusqlite::Result<_>>()?, total))
}

pub fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

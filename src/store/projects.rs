use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::users::{UserSummary, SUMMARY_COLUMNS};
use crate::db::{new_id, ts, ts_col};
use crate::domain::access::AccessFacts;
use crate::domain::{AssigneeRole, PermissionLevel, ProjectMemberRole, ProjectStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub team: String,
    pub team_name: String,
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ProjectStatus,
    pub created_by: String,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT: &str = "SELECT p.id, p.team_id, t.name, p.name, p.description, p.start_date,
        p.end_date, p.status, p.created_by, TRIM(u.first_name || ' ' || u.last_name),
        p.created_at, p.updated_at
     FROM projects p
     JOIN teams t ON t.id = p.team_id
     JOIN users u ON u.id = p.created_by";

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        team: row.get(1)?,
        team_name: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        start_date: ts_col(row, 5)?,
        end_date: ts_col(row, 6)?,
        status: row.get(7)?,
        created_by: row.get(8)?,
        created_by_name: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

pub struct NewProject<'a> {
    pub team_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ProjectStatus,
    pub created_by: &'a str,
}

pub fn insert(conn: &Connection, new: &NewProject<'_>) -> rusqlite::Result<Project> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO projects (id, team_id, name, description, start_date, end_date, status, created_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            new.team_id,
            new.name,
            new.description,
            ts(new.start_date),
            ts(new.end_date),
            new.status,
            new.created_by,
            now
        ],
    )?;
    conn.query_row(&format!("{} WHERE p.id = ?1", SELECT), [&id], map_project)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<Project>> {
    conn.query_row(&format!("{} WHERE p.id = ?1", SELECT), [id], map_project)
        .optional()
}

/// Newest first.
pub fn list_for_team(
    conn: &Connection,
    team_id: &str,
    page: Option<(i64, i64)>,
) -> rusqlite::Result<Vec<Project>> {
    let mut sql = format!(
        "{} WHERE p.team_id = ?1 ORDER BY p.created_at DESC, p.rowid DESC",
        SELECT
    );
    if let Some((limit, offset)) = page {
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
    }
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([team_id], map_project)?;
    rows.collect()
}

pub fn count_for_team(conn: &Connection, team_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE team_id = ?1",
        [team_id],
        |row| row.get(0),
    )
}

pub fn name_taken(conn: &Connection, team_id: &str, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE team_id = ?1 AND name = ?2)",
        [team_id, name],
        |row| row.get(0),
    )
}

#[derive(Debug, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<ProjectStatus>,
}

pub fn update(conn: &Connection, id: &str, patch: &ProjectPatch) -> rusqlite::Result<()> {
    let clear_description = matches!(patch.description, Some(None));
    conn.execute(
        "UPDATE projects SET
            name = COALESCE(?2, name),
            description = CASE WHEN ?3 THEN NULL ELSE COALESCE(?4, description) END,
            start_date = COALESCE(?5, start_date),
            end_date = COALESCE(?6, end_date),
            status = COALESCE(?7, status),
            updated_at = ?8
         WHERE id = ?1",
        params![
            id,
            patch.name,
            clear_description,
            patch.description.clone().flatten(),
            patch.start_date.map(ts),
            patch.end_date.map(ts),
            patch.status,
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn set_team(conn: &Connection, id: &str, team_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE projects SET team_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, team_id, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn delete(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
    Ok(())
}

const USER_TEAMS: &str =
    "p.team_id IN (SELECT team_id FROM team_members WHERE user_id = ?1 AND is_active = 1)";

/// Projects across the user's active teams, most recently updated first.
pub fn recent_for_user(conn: &Connection, user_id: &str, limit: i64) -> rusqlite::Result<Vec<Project>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE {} ORDER BY p.updated_at DESC, p.rowid DESC LIMIT ?2",
        SELECT, USER_TEAMS
    ))?;
    let rows = stmt.query_map(params![user_id, limit], map_project)?;
    rows.collect()
}

pub fn count_for_user(
    conn: &Connection,
    user_id: &str,
    status: Option<ProjectStatus>,
) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM projects p WHERE {} AND (?2 IS NULL OR p.status = ?2)",
            USER_TEAMS
        ),
        params![user_id, status],
        |row| row.get(0),
    )
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProjectCounts {
    pub member_count: i64,
    pub assignee_count: i64,
    pub task_count: i64,
    pub completed_task_count: i64,
    pub is_favorite: bool,
}

pub fn counts(conn: &Connection, project_id: &str, user_id: &str) -> rusqlite::Result<ProjectCounts> {
    conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM project_members WHERE project_id = ?1),
            (SELECT COUNT(*) FROM project_assignees WHERE project_id = ?1),
            (SELECT COUNT(*) FROM tasks WHERE project_id = ?1),
            (SELECT COUNT(*) FROM tasks WHERE project_id = ?1 AND status = 5),
            EXISTS(SELECT 1 FROM project_favorites WHERE project_id = ?1 AND user_id = ?2)",
        [project_id, user_id],
        |row| {
            Ok(ProjectCounts {
                member_count: row.get(0)?,
                assignee_count: row.get(1)?,
                task_count: row.get(2)?,
                completed_task_count: row.get(3)?,
                is_favorite: row.get(4)?,
            })
        },
    )
}

/// Everything the access resolver needs, in one round trip.
pub fn access_facts(
    conn: &Connection,
    project: &Project,
    user_id: &str,
) -> rusqlite::Result<AccessFacts> {
    conn.query_row(
        "SELECT
            (SELECT role FROM team_members WHERE team_id = ?1 AND user_id = ?3 AND is_active = 1),
            (SELECT level FROM project_permissions WHERE project_id = ?2 AND user_id = ?3),
            (SELECT role FROM project_assignees WHERE project_id = ?2 AND user_id = ?3),
            EXISTS(SELECT 1 FROM project_members WHERE project_id = ?2 AND user_id = ?3)",
        [project.team.as_str(), project.id.as_str(), user_id],
        |row| {
            Ok(AccessFacts {
                team_role: row.get(0)?,
                explicit: row.get(1)?,
                assignee: row.get(2)?,
                project_member: row.get(3)?,
            })
        },
    )
}

// --- Assignees ---

#[derive(Debug, Clone, Serialize)]
pub struct AssigneeView {
    pub id: String,
    pub user: String,
    pub user_details: UserSummary,
    pub role: AssigneeRole,
    pub role_display: &'static str,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub is_lead: bool,
}

pub fn upsert_assignee(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    role: AssigneeRole,
    assigned_by: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO project_assignees (id, project_id, user_id, role, assigned_by, assigned_at, is_lead)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (project_id, user_id) DO UPDATE SET
            role = excluded.role, is_lead = excluded.is_lead",
        params![
            new_id(),
            project_id,
            user_id,
            role,
            assigned_by,
            ts(Utc::now()),
            role == AssigneeRole::Lead
        ],
    )?;
    Ok(())
}

pub fn list_assignees(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<AssigneeView>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT a.id, a.role, a.assigned_by, a.assigned_at, a.is_lead, {}
         FROM project_assignees a JOIN users u ON u.id = a.user_id
         WHERE a.project_id = ?1 ORDER BY a.role DESC, a.assigned_at, a.rowid",
        SUMMARY_COLUMNS
    ))?;
    let rows = stmt.query_map([project_id], |row| {
        let role: AssigneeRole = row.get(1)?;
        let user_details = UserSummary::from_row(row, 5)?;
        Ok(AssigneeView {
            id: row.get(0)?,
            user: user_details.id.clone(),
            user_details,
            role,
            role_display: role.label(),
            assigned_by: row.get(2)?,
            assigned_at: ts_col(row, 3)?,
            is_lead: row.get(4)?,
        })
    })?;
    rows.collect()
}

pub fn assignee_user_ids(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM project_assignees WHERE project_id = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map([project_id], |row| row.get(0))?;
    rows.collect()
}

/// Drop a user from the project entirely: assignee, member and permission rows.
pub fn detach_user(conn: &Connection, project_id: &str, user_id: &str) -> rusqlite::Result<()> {
    for table in ["project_assignees", "project_members", "project_permissions"] {
        conn.execute(
            &format!("DELETE FROM {} WHERE project_id = ?1 AND user_id = ?2", table),
            [project_id, user_id],
        )?;
    }
    Ok(())
}

// --- Members ---

#[derive(Debug, Clone, Serialize)]
pub struct ProjectMemberView {
    pub id: String,
    pub user: UserSummary,
    pub role: ProjectMemberRole,
    pub role_display: &'static str,
    pub joined_at: DateTime<Utc>,
}

/// Add a member row; an existing row keeps its id and takes the new role.
pub fn upsert_member(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    role: ProjectMemberRole,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO project_members (id, project_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (project_id, user_id) DO UPDATE SET role = excluded.role",
        params![new_id(), project_id, user_id, role, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn member_role(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
) -> rusqlite::Result<Option<ProjectMemberRole>> {
    conn.query_row(
        "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
        [project_id, user_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn list_members(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<ProjectMemberView>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT m.id, m.role, m.joined_at, {}
         FROM project_members m JOIN users u ON u.id = m.user_id
         WHERE m.project_id = ?1 ORDER BY m.joined_at, m.rowid",
        SUMMARY_COLUMNS
    ))?;
    let rows = stmt.query_map([project_id], |row| {
        let role: ProjectMemberRole = row.get(1)?;
        Ok(ProjectMemberView {
            id: row.get(0)?,
            role,
            role_display: role.label(),
            joined_at: ts_col(row, 2)?,
            user: UserSummary::from_row(row, 3)?,
        })
    })?;
    rows.collect()
}

pub fn member_user_ids(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map([project_id], |row| row.get(0))?;
    rows.collect()
}

// --- Stored permission levels ---

pub fn set_permission(
    conn: &Connection,
    project_id: &str,
    user_id: &str,
    level: PermissionLevel,
) -> rusqlite::Result<()> {
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO project_permissions (id, project_id, user_id, level, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT (project_id, user_id) DO UPDATE SET
            level = excluded.level, updated_at = excluded.updated_at",
        params![new_id(), project_id, user_id, level, now],
    )?;
    Ok(())
}

// --- Favorites ---

/// Flip the favorite flag; returns the new state.
pub fn toggle_favorite(conn: &Connection, project_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    let removed = conn.execute(
        "DELETE FROM project_favorites WHERE project_id = ?1 AND user_id = ?2",
        [project_id, user_id],
    )?;
    if removed > 0 {
        return Ok(false);
    }
    conn.execute(
        "INSERT INTO project_favorites (project_id, user_id) VALUES (?1, ?2)",
        [project_id, user_id],
    )?;
    Ok(true)
}

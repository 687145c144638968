use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;
use serde_json::Value;

use super::users::{UserSummary, SUMMARY_COLUMNS};
use crate::db::{json_col, new_id, ts, ts_col};
use crate::domain::ActionType;

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: String,
    pub user: UserSummary,
    pub team: Option<String>,
    pub team_name: Option<String>,
    pub project: Option<String>,
    pub project_name: Option<String>,
    pub action_type: ActionType,
    pub action_display: &'static str,
    pub description: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<ActivityEntry> {
    let action_type: ActionType = row.get(5)?;
    Ok(ActivityEntry {
        id: row.get(0)?,
        team: row.get(1)?,
        team_name: row.get(2)?,
        project: row.get(3)?,
        project_name: row.get(4)?,
        action_type,
        action_display: action_type.label(),
        description: row.get(6)?,
        details: json_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        user: UserSummary::from_row(row, 9)?,
    })
}

#[derive(Debug, Clone)]
pub struct NewActivity<'a> {
    pub user_id: &'a str,
    pub team_id: Option<&'a str>,
    pub project_id: Option<&'a str>,
    pub action_type: ActionType,
    pub description: String,
    pub details: Value,
}

pub fn insert(conn: &Connection, new: &NewActivity<'_>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO activity_logs (id, user_id, team_id, project_id, action_type, description, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new_id(),
            new.user_id,
            new.team_id,
            new.project_id,
            new.action_type,
            new.description,
            new.details.to_string(),
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct ActivityQuery<'a> {
    pub team_id: Option<&'a str>,
    pub project_id: Option<&'a str>,
    /// Any of these teams; used for the cross-team feed.
    pub team_ids: Option<&'a [String]>,
    pub action_type: Option<ActionType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Newest first.
pub fn query(conn: &Connection, q: &ActivityQuery<'_>) -> rusqlite::Result<Vec<ActivityEntry>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(team_id) = q.team_id {
        clauses.push("a.team_id = ?".into());
        args.push(team_id.to_string().into());
    }
    if let Some(project_id) = q.project_id {
        clauses.push("a.project_id = ?".into());
        args.push(project_id.to_string().into());
    }
    if let Some(team_ids) = q.team_ids {
        if team_ids.is_empty() {
            return Ok(Vec::new());
        }
        let marks = vec!["?"; team_ids.len()].join(", ");
        clauses.push(format!("a.team_id IN ({})", marks));
        args.extend(team_ids.iter().map(|id| id.clone().into()));
    }
    if let Some(action_type) = q.action_type {
        clauses.push("a.action_type = ?".into());
        args.push(action_type.code().into());
    }
    if let Some(since) = q.since {
        clauses.push("a.created_at >= ?".into());
        args.push(ts(since).into());
    }

    let mut sql = format!(
        "SELECT a.id, a.team_id, t.name, a.project_id, p.name, a.action_type, a.description,
                a.details, a.created_at, {}
         FROM activity_logs a
         JOIN users u ON u.id = a.user_id
         LEFT JOIN teams t ON t.id = a.team_id
         LEFT JOIN projects p ON p.id = a.project_id",
        SUMMARY_COLUMNS
    );
    if !clauses.is_empty() {
        sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }
    sql.push_str(" ORDER BY a.created_at DESC, a.rowid DESC");
    if let Some(limit) = q.limit {
        sql.push_str(&format!(" LIMIT {}", limit.max(0)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_entry)?;
    rows.collect()
}

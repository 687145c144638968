use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::users::{UserSummary, SUMMARY_COLUMNS};
use crate::db::{new_id, opt_ts_col, ts, ts_col};
use crate::domain::{SubtaskStatus, TaskPriority, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub project: String,
    pub project_name: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub assignee_details: Option<UserSummary>,
    pub created_by: String,
    pub subtask_count: i64,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TASK_SELECT: &str = "SELECT t.id, t.project_id, p.name, t.title, t.description, t.status,
        t.priority, t.start_date, t.end_date, t.due_date, t.assignee_id, t.created_by,
        (SELECT COUNT(*) FROM subtasks s WHERE s.task_id = t.id),
        t.completed_at, t.created_at, t.updated_at,
        u.id, u.email, u.username, u.first_name, u.last_name
     FROM tasks t
     JOIN projects p ON p.id = t.project_id
     LEFT JOIN users u ON u.id = t.assignee_id";

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let assignee: Option<String> = row.get(10)?;
    let assignee_details = match assignee {
        Some(_) => Some(UserSummary::from_row(row, 16)?),
        None => None,
    };
    Ok(Task {
        id: row.get(0)?,
        project: row.get(1)?,
        project_name: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        priority: row.get(6)?,
        start_date: opt_ts_col(row, 7)?,
        end_date: opt_ts_col(row, 8)?,
        due_date: opt_ts_col(row, 9)?,
        assignee,
        assignee_details,
        created_by: row.get(11)?,
        subtask_count: row.get(12)?,
        completed_at: opt_ts_col(row, 13)?,
        created_at: ts_col(row, 14)?,
        updated_at: ts_col(row, 15)?,
    })
}

/// Full field set written on insert and on every update.
#[derive(Debug, Clone)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskFields {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            start_date: task.start_date,
            end_date: task.end_date,
            due_date: task.due_date,
            assignee: task.assignee.clone(),
            completed_at: task.completed_at,
        }
    }
}

pub fn insert_task(
    conn: &Connection,
    project_id: &str,
    created_by: &str,
    fields: &TaskFields,
) -> rusqlite::Result<Task> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO tasks (id, project_id, title, description, status, priority, start_date, end_date,
            due_date, assignee_id, created_by, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?13)",
        params![
            id,
            project_id,
            fields.title,
            fields.description,
            fields.status,
            fields.priority,
            fields.start_date.map(ts),
            fields.end_date.map(ts),
            fields.due_date.map(ts),
            fields.assignee,
            created_by,
            now,
            fields.completed_at.map(ts)
        ],
    )?;
    conn.query_row(&format!("{} WHERE t.id = ?1", TASK_SELECT), [&id], map_task)
}

pub fn update_task(conn: &Connection, id: &str, fields: &TaskFields) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE tasks SET title = ?2, description = ?3, status = ?4, priority = ?5,
            start_date = ?6, end_date = ?7, due_date = ?8, assignee_id = ?9,
            completed_at = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            id,
            fields.title,
            fields.description,
            fields.status,
            fields.priority,
            fields.start_date.map(ts),
            fields.end_date.map(ts),
            fields.due_date.map(ts),
            fields.assignee,
            fields.completed_at.map(ts),
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, id: &str) -> rusqlite::Result<Option<Task>> {
    conn.query_row(&format!("{} WHERE t.id = ?1", TASK_SELECT), [id], map_task)
        .optional()
}

pub fn delete_task(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct TaskFilter<'a> {
    pub project_id: Option<&'a str>,
    /// Any project of any team the user is an active member of.
    pub visible_to: Option<&'a str>,
    pub status: Option<TaskStatus>,
    pub not_status: Option<TaskStatus>,
    pub assignee: Option<&'a str>,
    pub due_before: Option<DateTime<Utc>>,
    pub order: TaskOrder,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub enum TaskOrder {
    #[default]
    Newest,
    RecentlyUpdated,
    DueSoonest,
}

pub fn query_tasks(conn: &Connection, filter: &TaskFilter<'_>) -> rusqlite::Result<Vec<Task>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    if let Some(project_id) = filter.project_id {
        clauses.push("t.project_id = ?");
        args.push(project_id.to_string().into());
    }
    if let Some(user_id) = filter.visible_to {
        clauses.push(
            "p.team_id IN (SELECT team_id FROM team_members WHERE user_id = ? AND is_active = 1)",
        );
        args.push(user_id.to_string().into());
    }
    if let Some(status) = filter.status {
        clauses.push("t.status = ?");
        args.push(status.code().into());
    }
    if let Some(status) = filter.not_status {
        clauses.push("t.status != ?");
        args.push(status.code().into());
    }
    if let Some(assignee) = filter.assignee {
        clauses.push("t.assignee_id = ?");
        args.push(assignee.to_string().into());
    }
    if let Some(due_before) = filter.due_before {
        clauses.push("t.due_date IS NOT NULL AND t.due_date <= ?");
        args.push(ts(due_before).into());
    }

    let mut sql = TASK_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(match filter.order {
        TaskOrder::Newest => " ORDER BY t.created_at DESC, t.rowid DESC",
        TaskOrder::RecentlyUpdated => " ORDER BY t.updated_at DESC, t.rowid DESC",
        TaskOrder::DueSoonest => " ORDER BY t.due_date, t.rowid",
    });
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit.max(0)));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_task)?;
    rows.collect()
}

// --- Subtasks ---

#[derive(Debug, Clone, Serialize)]
pub struct Subtask {
    pub id: String,
    pub task: String,
    pub task_title: String,
    pub title: String,
    pub description: Option<String>,
    pub status: SubtaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub assignee_details: Option<UserSummary>,
    pub created_by: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SUBTASK_SELECT: &str = "SELECT s.id, s.task_id, t.title, s.title, s.description, s.status,
        s.due_date, s.assignee_id, s.created_by, s.completed_at, s.created_at, s.updated_at,
        u.id, u.email, u.username, u.first_name, u.last_name
     FROM subtasks s
     JOIN tasks t ON t.id = s.task_id
     LEFT JOIN users u ON u.id = s.assignee_id";

fn map_subtask(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    let assignee: Option<String> = row.get(7)?;
    let assignee_details = match assignee {
        Some(_) => Some(UserSummary::from_row(row, 12)?),
        None => None,
    };
    Ok(Subtask {
        id: row.get(0)?,
        task: row.get(1)?,
        task_title: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: row.get(5)?,
        due_date: opt_ts_col(row, 6)?,
        assignee,
        assignee_details,
        created_by: row.get(8)?,
        completed_at: opt_ts_col(row, 9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

#[derive(Debug, Clone)]
pub struct SubtaskFields {
    pub title: String,
    pub description: Option<String>,
    pub status: SubtaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Subtask> for SubtaskFields {
    fn from(subtask: &Subtask) -> Self {
        Self {
            title: subtask.title.clone(),
            description: subtask.description.clone(),
            status: subtask.status,
            due_date: subtask.due_date,
            assignee: subtask.assignee.clone(),
            completed_at: subtask.completed_at,
        }
    }
}

pub fn insert_subtask(
    conn: &Connection,
    task_id: &str,
    created_by: &str,
    fields: &SubtaskFields,
) -> rusqlite::Result<Subtask> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO subtasks (id, task_id, title, description, status, due_date, assignee_id,
            created_by, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)",
        params![
            id,
            task_id,
            fields.title,
            fields.description,
            fields.status,
            fields.due_date.map(ts),
            fields.assignee,
            created_by,
            now,
            fields.completed_at.map(ts)
        ],
    )?;
    conn.query_row(&format!("{} WHERE s.id = ?1", SUBTASK_SELECT), [&id], map_subtask)
}

pub fn update_subtask(conn: &Connection, id: &str, fields: &SubtaskFields) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE subtasks SET title = ?2, description = ?3, status = ?4, due_date = ?5,
            assignee_id = ?6, completed_at = ?7, updated_at = ?8
         WHERE id = ?1",
        params![
            id,
            fields.title,
            fields.description,
            fields.status,
            fields.due_date.map(ts),
            fields.assignee,
            fields.completed_at.map(ts),
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn get_subtask(conn: &Connection, task_id: &str, id: &str) -> rusqlite::Result<Option<Subtask>> {
    conn.query_row(
        &format!("{} WHERE s.task_id = ?1 AND s.id = ?2", SUBTASK_SELECT),
        [task_id, id],
        map_subtask,
    )
    .optional()
}

pub fn list_subtasks(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<Subtask>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE s.task_id = ?1 ORDER BY s.created_at, s.rowid",
        SUBTASK_SELECT
    ))?;
    let rows = stmt.query_map([task_id], map_subtask)?;
    rows.collect()
}

pub fn delete_subtask(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM subtasks WHERE id = ?1", [id])?;
    Ok(())
}

// --- Comments ---

#[derive(Debug, Clone, Serialize)]
pub struct TaskComment {
    pub id: String,
    pub task: String,
    pub user: String,
    pub user_details: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<TaskComment> {
    let user_details = UserSummary::from_row(row, 5)?;
    Ok(TaskComment {
        id: row.get(0)?,
        task: row.get(1)?,
        user: user_details.id.clone(),
        user_details,
        content: row.get(2)?,
        created_at: ts_col(row, 3)?,
        updated_at: ts_col(row, 4)?,
    })
}

const COMMENT_SELECT: &str = "SELECT c.id, c.task_id, c.content, c.created_at, c.updated_at";

pub fn insert_comment(
    conn: &Connection,
    task_id: &str,
    user_id: &str,
    content: &str,
) -> rusqlite::Result<TaskComment> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO task_comments (id, task_id, user_id, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, task_id, user_id, content, now],
    )?;
    conn.query_row(
        &format!(
            "{}, {} FROM task_comments c JOIN users u ON u.id = c.user_id WHERE c.id = ?1",
            COMMENT_SELECT, SUMMARY_COLUMNS
        ),
        [&id],
        map_comment,
    )
}

/// Oldest first.
pub fn list_comments(conn: &Connection, task_id: &str) -> rusqlite::Result<Vec<TaskComment>> {
    let mut stmt = conn.prepare(&format!(
        "{}, {} FROM task_comments c JOIN users u ON u.id = c.user_id
         WHERE c.task_id = ?1 ORDER BY c.created_at, c.rowid",
        COMMENT_SELECT, SUMMARY_COLUMNS
    ))?;
    let rows = stmt.query_map([task_id], map_comment)?;
    rows.collect()
}

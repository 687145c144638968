use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use super::users::{UserSummary, SUMMARY_COLUMNS};
use crate::db::{json_col, new_id, ts, ts_col};
use crate::domain::{ColumnType, SheetType};

#[derive(Debug, Clone, Serialize)]
pub struct Sheet {
    pub id: String,
    pub project: String,
    pub name: String,
    pub description: Option<String>,
    pub sheet_type: SheetType,
    pub created_by: String,
    pub created_by_name: String,
    pub is_public: bool,
    pub settings: Value,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SHEET_SELECT: &str = "SELECT s.id, s.project_id, s.name, s.description, s.sheet_type,
        s.created_by, TRIM(u.first_name || ' ' || u.last_name), s.is_public, s.settings,
        (SELECT COUNT(*) FROM sheet_rows r WHERE r.sheet_id = s.id),
        s.created_at, s.updated_at
     FROM sheets s JOIN users u ON u.id = s.created_by";

fn map_sheet(row: &Row<'_>) -> rusqlite::Result<Sheet> {
    Ok(Sheet {
        id: row.get(0)?,
        project: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        sheet_type: row.get(4)?,
        created_by: row.get(5)?,
        created_by_name: row.get(6)?,
        is_public: row.get(7)?,
        settings: json_col(row, 8)?,
        row_count: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

#[derive(Debug, Clone)]
pub struct SheetFields {
    pub name: String,
    pub description: Option<String>,
    pub sheet_type: SheetType,
    pub is_public: bool,
    pub settings: Value,
}

impl From<&Sheet> for SheetFields {
    fn from(sheet: &Sheet) -> Self {
        Self {
            name: sheet.name.clone(),
            description: sheet.description.clone(),
            sheet_type: sheet.sheet_type,
            is_public: sheet.is_public,
            settings: sheet.settings.clone(),
        }
    }
}

pub fn insert_sheet(
    conn: &Connection,
    project_id: &str,
    created_by: &str,
    fields: &SheetFields,
) -> rusqlite::Result<Sheet> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO sheets (id, project_id, name, description, sheet_type, created_by, is_public, settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            id,
            project_id,
            fields.name,
            fields.description,
            fields.sheet_type,
            created_by,
            fields.is_public,
            fields.settings.to_string(),
            now
        ],
    )?;
    conn.query_row(&format!("{} WHERE s.id = ?1", SHEET_SELECT), [&id], map_sheet)
}

pub fn update_sheet(conn: &Connection, id: &str, fields: &SheetFields) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sheets SET name = ?2, description = ?3, sheet_type = ?4, is_public = ?5,
            settings = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            id,
            fields.name,
            fields.description,
            fields.sheet_type,
            fields.is_public,
            fields.settings.to_string(),
            ts(Utc::now())
        ],
    )?;
    Ok(())
}

pub fn touch_sheet(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sheets SET updated_at = ?2 WHERE id = ?1",
        params![id, ts(Utc::now())],
    )?;
    Ok(())
}

pub fn get_sheet(conn: &Connection, project_id: &str, id: &str) -> rusqlite::Result<Option<Sheet>> {
    conn.query_row(
        &format!("{} WHERE s.project_id = ?1 AND s.id = ?2", SHEET_SELECT),
        [project_id, id],
        map_sheet,
    )
    .optional()
}

pub fn list_sheets(conn: &Connection, project_id: &str) -> rusqlite::Result<Vec<Sheet>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE s.project_id = ?1 ORDER BY s.created_at DESC, s.rowid DESC",
        SHEET_SELECT
    ))?;
    let rows = stmt.query_map([project_id], map_sheet)?;
    rows.collect()
}

pub fn delete_sheet(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sheets WHERE id = ?1", [id])?;
    Ok(())
}

// --- Columns ---

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub id: String,
    pub sheet: String,
    pub name: String,
    pub key: String,
    pub column_type: ColumnType,
    pub width: i64,
    #[serde(rename = "order")]
    pub position: i64,
    pub is_required: bool,
    pub options: Value,
    pub formula: Option<String>,
}

const COLUMN_SELECT: &str = "SELECT id, sheet_id, name, key, column_type, width, position,
        is_required, options, formula FROM sheet_columns";

fn map_column(row: &Row<'_>) -> rusqlite::Result<Column> {
    Ok(Column {
        id: row.get(0)?,
        sheet: row.get(1)?,
        name: row.get(2)?,
        key: row.get(3)?,
        column_type: row.get(4)?,
        width: row.get(5)?,
        position: row.get(6)?,
        is_required: row.get(7)?,
        options: json_col(row, 8)?,
        formula: row.get(9)?,
    })
}

pub struct NewColumn<'a> {
    pub name: &'a str,
    pub key: &'a str,
    pub column_type: ColumnType,
    pub width: i64,
    pub is_required: bool,
    pub options: &'a Value,
    pub formula: Option<&'a str>,
}

/// Appends after the last column.
pub fn insert_column(conn: &Connection, sheet_id: &str, new: &NewColumn<'_>) -> rusqlite::Result<Column> {
    let id = new_id();
    conn.execute(
        "INSERT INTO sheet_columns (id, sheet_id, name, key, column_type, width, position, is_required, options, formula)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6,
            (SELECT COALESCE(MAX(position) + 1, 0) FROM sheet_columns WHERE sheet_id = ?2),
            ?7, ?8, ?9)",
        params![
            id,
            sheet_id,
            new.name,
            new.key,
            new.column_type,
            new.width,
            new.is_required,
            new.options.to_string(),
            new.formula
        ],
    )?;
    conn.query_row(&format!("{} WHERE id = ?1", COLUMN_SELECT), [&id], map_column)
}

pub fn column_key_taken(conn: &Connection, sheet_id: &str, key: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sheet_columns WHERE sheet_id = ?1 AND key = ?2)",
        [sheet_id, key],
        |row| row.get(0),
    )
}

pub fn list_columns(conn: &Connection, sheet_id: &str) -> rusqlite::Result<Vec<Column>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE sheet_id = ?1 ORDER BY position, rowid",
        COLUMN_SELECT
    ))?;
    let rows = stmt.query_map([sheet_id], map_column)?;
    rows.collect()
}

// --- Rows and cells ---

#[derive(Debug, Clone, Serialize)]
pub struct SheetRow {
    pub id: String,
    pub sheet: String,
    #[serde(rename = "order")]
    pub position: i64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const ROW_SELECT: &str =
    "SELECT id, sheet_id, position, created_by, created_at, updated_at FROM sheet_rows";

fn map_row(row: &Row<'_>) -> rusqlite::Result<SheetRow> {
    Ok(SheetRow {
        id: row.get(0)?,
        sheet: row.get(1)?,
        position: row.get(2)?,
        created_by: row.get(3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

/// Appends after the last row.
pub fn insert_row(conn: &Connection, sheet_id: &str, created_by: &str) -> rusqlite::Result<SheetRow> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO sheet_rows (id, sheet_id, position, created_by, created_at, updated_at)
         VALUES (?1, ?2,
            (SELECT COALESCE(MAX(position) + 1, 0) FROM sheet_rows WHERE sheet_id = ?2),
            ?3, ?4, ?4)",
        params![id, sheet_id, created_by, now],
    )?;
    conn.query_row(&format!("{} WHERE id = ?1", ROW_SELECT), [&id], map_row)
}

pub fn list_rows(conn: &Connection, sheet_id: &str) -> rusqlite::Result<Vec<SheetRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE sheet_id = ?1 ORDER BY position, rowid",
        ROW_SELECT
    ))?;
    let rows = stmt.query_map([sheet_id], map_row)?;
    rows.collect()
}

pub fn row_exists(conn: &Connection, sheet_id: &str, row_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sheet_rows WHERE sheet_id = ?1 AND id = ?2)",
        [sheet_id, row_id],
        |row| row.get(0),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct Cell {
    pub id: String,
    pub row: String,
    pub column: String,
    pub column_key: String,
    pub value: Option<String>,
    pub updated_by: String,
    pub updated_by_name: String,
    pub updated_at: DateTime<Utc>,
}

const CELL_SELECT: &str = "SELECT c.id, c.row_id, c.column_id, col.key, c.value, c.updated_by,
        TRIM(u.first_name || ' ' || u.last_name), c.updated_at
     FROM sheet_cells c
     JOIN sheet_columns col ON col.id = c.column_id
     JOIN users u ON u.id = c.updated_by";

fn map_cell(row: &Row<'_>) -> rusqlite::Result<Cell> {
    Ok(Cell {
        id: row.get(0)?,
        row: row.get(1)?,
        column: row.get(2)?,
        column_key: row.get(3)?,
        value: row.get(4)?,
        updated_by: row.get(5)?,
        updated_by_name: row.get(6)?,
        updated_at: ts_col(row, 7)?,
    })
}

/// Cells of every row in a sheet.
pub fn cells_for_sheet(conn: &Connection, sheet_id: &str) -> rusqlite::Result<Vec<Cell>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE col.sheet_id = ?1 ORDER BY col.position, c.rowid",
        CELL_SELECT
    ))?;
    let rows = stmt.query_map([sheet_id], map_cell)?;
    rows.collect()
}

pub fn get_cell(conn: &Connection, sheet_id: &str, cell_id: &str) -> rusqlite::Result<Option<Cell>> {
    conn.query_row(
        &format!("{} WHERE col.sheet_id = ?1 AND c.id = ?2", CELL_SELECT),
        [sheet_id, cell_id],
        map_cell,
    )
    .optional()
}

pub fn set_cell_value(
    conn: &Connection,
    cell_id: &str,
    value: Option<&str>,
    updated_by: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sheet_cells SET value = ?2, updated_by = ?3, updated_at = ?4 WHERE id = ?1",
        params![cell_id, value, updated_by, ts(Utc::now())],
    )?;
    Ok(())
}

/// Insert or overwrite the cell at `(row, column)`; returns its id.
pub fn upsert_cell(
    conn: &Connection,
    row_id: &str,
    column_id: &str,
    value: Option<&str>,
    updated_by: &str,
) -> rusqlite::Result<String> {
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO sheet_cells (id, row_id, column_id, value, updated_by, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (row_id, column_id) DO UPDATE SET
            value = excluded.value, updated_by = excluded.updated_by, updated_at = excluded.updated_at",
        params![new_id(), row_id, column_id, value, updated_by, now],
    )?;
    conn.query_row(
        "SELECT id FROM sheet_cells WHERE row_id = ?1 AND column_id = ?2",
        [row_id, column_id],
        |row| row.get(0),
    )
}

// --- Comments ---

#[derive(Debug, Clone, Serialize)]
pub struct SheetComment {
    pub id: String,
    pub sheet: String,
    pub cell: Option<String>,
    pub user: UserSummary,
    pub content: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn map_comment(row: &Row<'_>) -> rusqlite::Result<SheetComment> {
    Ok(SheetComment {
        id: row.get(0)?,
        sheet: row.get(1)?,
        cell: row.get(2)?,
        content: row.get(3)?,
        resolved: row.get(4)?,
        created_at: ts_col(row, 5)?,
        updated_at: ts_col(row, 6)?,
        user: UserSummary::from_row(row, 7)?,
    })
}

fn comment_select() -> String {
    format!(
        "SELECT c.id, c.sheet_id, c.cell_id, c.content, c.resolved, c.created_at, c.updated_at, {}
         FROM sheet_comments c JOIN users u ON u.id = c.user_id",
        SUMMARY_COLUMNS
    )
}

pub fn insert_comment(
    conn: &Connection,
    sheet_id: &str,
    cell_id: Option<&str>,
    user_id: &str,
    content: &str,
) -> rusqlite::Result<SheetComment> {
    let id = new_id();
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO sheet_comments (id, sheet_id, cell_id, user_id, content, resolved, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
        params![id, sheet_id, cell_id, user_id, content, now],
    )?;
    conn.query_row(&format!("{} WHERE c.id = ?1", comment_select()), [&id], map_comment)
}

/// Newest first, optionally restricted to one cell.
pub fn list_comments(
    conn: &Connection,
    sheet_id: &str,
    cell_id: Option<&str>,
) -> rusqlite::Result<Vec<SheetComment>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE c.sheet_id = ?1 AND (?2 IS NULL OR c.cell_id = ?2)
         ORDER BY c.created_at DESC, c.rowid DESC",
        comment_select()
    ))?;
    let rows = stmt.query_map(params![sheet_id, cell_id], map_comment)?;
    rows.collect()
}

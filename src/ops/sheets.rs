use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{optional_text, project_participant, required_text, ProjectContext};
use crate::domain::{ColumnType, SheetType};
use crate::error::{ApiError, ApiResult};
use crate::store::sheets::{
    self as store, Cell, Column, NewColumn, Sheet, SheetComment, SheetFields, SheetRow,
};
use crate::utils::dates::deserialize_patch;

pub const DEFAULT_COLUMN_WIDTH: i64 = 150;

lazy_static::lazy_static! {
    static ref SLUG_STRIP: Regex = Regex::new(r"[^\w\s-]").expect("slug pattern compiles");
    static ref SLUG_DASH: Regex = Regex::new(r"[-\s]+").expect("slug pattern compiles");
}

/// `"Due Date!"` -> `"due-date"`.
pub fn slugify(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = SLUG_STRIP.replace_all(lowered.trim(), "");
    SLUG_DASH
        .replace_all(&stripped, "-")
        .trim_matches(|c| c == '-' || c == '_')
        .to_string()
}

/// Cell values are stored as text; JSON strings keep their content.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn load_sheet(conn: &Connection, ctx: &ProjectContext, sheet_id: &str) -> ApiResult<Sheet> {
    store::get_sheet(conn, &ctx.project.id, sheet_id)?.ok_or(ApiError::NotFound("Sheet"))
}

#[derive(Debug, Serialize)]
pub struct RowView {
    #[serde(flatten)]
    pub row: SheetRow,
    /// Keyed by column key.
    pub cells: BTreeMap<String, Cell>,
}

#[derive(Debug, Serialize)]
pub struct SheetDetail {
    #[serde(flatten)]
    pub sheet: Sheet,
    pub columns: Vec<Column>,
    pub rows: Vec<RowView>,
}

fn sheet_detail(conn: &Connection, sheet: Sheet) -> ApiResult<SheetDetail> {
    let columns = store::list_columns(conn, &sheet.id)?;
    let mut cells_by_row: HashMap<String, BTreeMap<String, Cell>> = HashMap::new();
    for cell in store::cells_for_sheet(conn, &sheet.id)? {
        cells_by_row
            .entry(cell.row.clone())
            .or_default()
            .insert(cell.column_key.clone(), cell);
    }
    let rows = store::list_rows(conn, &sheet.id)?
        .into_iter()
        .map(|row| RowView {
            cells: cells_by_row.remove(&row.id).unwrap_or_default(),
            row,
        })
        .collect();
    Ok(SheetDetail {
        sheet,
        columns,
        rows,
    })
}

pub fn list_sheets(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
) -> ApiResult<Vec<Sheet>> {
    project_participant(conn, team_id, project_id, user_id)?;
    Ok(store::list_sheets(conn, project_id)?)
}

#[derive(Debug, Default, Deserialize)]
pub struct SheetInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub description: Option<Option<String>>,
    pub sheet_type: Option<SheetType>,
    pub is_public: Option<bool>,
    pub settings: Option<Value>,
}

fn check_settings(settings: &Value) -> ApiResult<()> {
    if !settings.is_object() {
        return Err(ApiError::field("settings", "Settings must be an object."));
    }
    Ok(())
}

pub fn create_sheet(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    input: SheetInput,
) -> ApiResult<SheetDetail> {
    project_participant(conn, team_id, project_id, user_id)?;
    let settings = input.settings.unwrap_or_else(|| Value::Object(Default::default()));
    check_settings(&settings)?;
    let fields = SheetFields {
        name: required_text("name", input.name.as_deref())?,
        description: optional_text(input.description.flatten()),
        sheet_type: input.sheet_type.unwrap_or(SheetType::Spreadsheet),
        is_public: input.is_public.unwrap_or(false),
        settings,
    };
    let sheet = store::insert_sheet(conn, project_id, user_id, &fields)?;
    sheet_detail(conn, sheet)
}

pub fn get_sheet(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
) -> ApiResult<SheetDetail> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    sheet_detail(conn, sheet)
}

pub fn update_sheet(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    input: SheetInput,
) -> ApiResult<SheetDetail> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let mut fields = SheetFields::from(&sheet);

    if let Some(name) = input.name.as_deref() {
        fields.name = required_text("name", Some(name))?;
    }
    if let Some(description) = input.description {
        fields.description = optional_text(description);
    }
    if let Some(sheet_type) = input.sheet_type {
        fields.sheet_type = sheet_type;
    }
    if let Some(is_public) = input.is_public {
        fields.is_public = is_public;
    }
    if let Some(settings) = input.settings {
        check_settings(&settings)?;
        fields.settings = settings;
    }

    store::update_sheet(conn, &sheet.id, &fields)?;
    get_sheet(conn, user_id, team_id, project_id, &sheet.id)
}

pub fn delete_sheet(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
) -> ApiResult<()> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    if sheet.created_by != user_id && !ctx.access.capabilities().manage_members {
        return Err(ApiError::forbidden("Insufficient permissions to delete sheet"));
    }
    store::delete_sheet(conn, &sheet.id)?;
    Ok(())
}

// --- Columns and rows ---

#[derive(Debug, Default, Deserialize)]
pub struct ColumnInput {
    pub name: Option<String>,
    pub key: Option<String>,
    pub column_type: Option<ColumnType>,
    pub width: Option<i64>,
    pub is_required: Option<bool>,
    pub options: Option<Value>,
    pub formula: Option<String>,
}

/// Explicit keys must be free; derived ones get a numeric suffix.
fn column_key(conn: &Connection, sheet_id: &str, name: &str, key: Option<String>) -> ApiResult<String> {
    if let Some(key) = optional_text(key) {
        if store::column_key_taken(conn, sheet_id, &key)? {
            return Err(ApiError::field(
                "key",
                "A column with this key already exists in this sheet.",
            ));
        }
        return Ok(key);
    }

    let base = match slugify(name) {
        slug if slug.is_empty() => "column".to_string(),
        slug => slug,
    };
    let mut candidate = base.clone();
    let mut n = 2;
    while store::column_key_taken(conn, sheet_id, &candidate)? {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    Ok(candidate)
}

pub fn add_column(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    input: ColumnInput,
) -> ApiResult<Column> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let name = required_text("name", input.name.as_deref())?;
    let key = column_key(conn, &sheet.id, &name, input.key)?;
    let width = input.width.unwrap_or(DEFAULT_COLUMN_WIDTH);
    if width <= 0 {
        return Err(ApiError::field("width", "Width must be positive."));
    }
    let options = input.options.unwrap_or_else(|| Value::Array(Vec::new()));

    let column = store::insert_column(
        conn,
        &sheet.id,
        &NewColumn {
            name: &name,
            key: &key,
            column_type: input.column_type.unwrap_or(ColumnType::Text),
            width,
            is_required: input.is_required.unwrap_or(false),
            options: &options,
            formula: input.formula.as_deref(),
        },
    )?;
    store::touch_sheet(conn, &sheet.id)?;
    Ok(column)
}

pub fn add_row(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
) -> ApiResult<SheetRow> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let row = store::insert_row(conn, &sheet.id, user_id)?;
    store::touch_sheet(conn, &sheet.id)?;
    Ok(row)
}

// --- Cells ---

#[derive(Debug, Default, Deserialize)]
pub struct CellInput {
    #[serde(default)]
    pub value: Value,
}

pub fn update_cell(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    cell_id: &str,
    input: CellInput,
) -> ApiResult<Cell> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let cell = store::get_cell(conn, &sheet.id, cell_id)?.ok_or(ApiError::NotFound("Cell"))?;
    store::set_cell_value(conn, &cell.id, cell_text(&input.value).as_deref(), user_id)?;
    store::touch_sheet(conn, &sheet.id)?;
    store::get_cell(conn, &sheet.id, &cell.id)?.ok_or(ApiError::NotFound("Cell"))
}

#[derive(Debug, Deserialize)]
pub struct BulkInput {
    #[serde(default)]
    pub updates: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct BulkUpdated {
    pub updated: usize,
    pub cells: Vec<Cell>,
}

/// Upsert many cells at once. Every entry is validated before anything is
/// written, so one bad entry rejects the whole batch.
pub fn bulk_update(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    input: BulkInput,
) -> ApiResult<BulkUpdated> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let columns: HashMap<String, String> = store::list_columns(conn, &sheet.id)?
        .into_iter()
        .map(|c| (c.key, c.id))
        .collect();

    let mut planned = Vec::with_capacity(input.updates.len());
    for update in &input.updates {
        let (Some(row_id), Some(column_key), Some(value)) = (
            update.get("row_id").and_then(Value::as_str),
            update.get("column_key").and_then(Value::as_str),
            update.get("value"),
        ) else {
            return Err(ApiError::bad_request(
                "Each update must contain row_id, column_key, and value",
            ));
        };
        if !store::row_exists(conn, &sheet.id, row_id)? {
            return Err(ApiError::bad_request(format!("Unknown row: {}", row_id)));
        }
        let column_id = columns
            .get(column_key)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown column: {}", column_key)))?;
        planned.push((row_id.to_string(), column_id.clone(), cell_text(value)));
    }

    let tx = conn.transaction()?;
    let mut ids = Vec::with_capacity(planned.len());
    for (row_id, column_id, value) in &planned {
        ids.push(store::upsert_cell(&tx, row_id, column_id, value.as_deref(), user_id)?);
    }
    store::touch_sheet(&tx, &sheet.id)?;
    let cells = ids
        .iter()
        .filter_map(|id| store::get_cell(&tx, &sheet.id, id).transpose())
        .collect::<rusqlite::Result<Vec<_>>>()?;
    tx.commit()?;

    Ok(BulkUpdated {
        updated: planned.len(),
        cells,
    })
}

// --- Comments ---

#[derive(Debug, Deserialize)]
pub struct SheetCommentInput {
    pub content: Option<String>,
    pub cell_id: Option<String>,
    /// Alias accepted from clients that send the cell under `cell`.
    pub cell: Option<String>,
}

pub fn list_comments(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    cell_id: Option<&str>,
) -> ApiResult<Vec<SheetComment>> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let cell_id = cell_id.filter(|c| !c.is_empty());
    Ok(store::list_comments(conn, &sheet.id, cell_id)?)
}

pub fn add_comment(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    sheet_id: &str,
    input: SheetCommentInput,
) -> ApiResult<SheetComment> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let sheet = load_sheet(conn, &ctx, sheet_id)?;
    let content = required_text("content", input.content.as_deref())?;
    let cell_id = optional_text(input.cell_id.or(input.cell));
    if let Some(cell_id) = &cell_id {
        if store::get_cell(conn, &sheet.id, cell_id)?.is_none() {
            return Err(ApiError::field("cell_id", "Cell does not belong to this sheet."));
        }
    }
    Ok(store::insert_comment(
        conn,
        &sheet.id,
        cell_id.as_deref(),
        user_id,
        &content,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TeamRole;
    use crate::ops::projects::{create_project, ProjectInput};
    use crate::ops::testutil;
    use chrono::{Duration, Utc};
    use serde_json::json;

    struct Fixture {
        conn: Connection,
        owner: String,
        member: String,
        team: String,
        project: String,
    }

    fn fixture() -> Fixture {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);
        let start = Utc::now();
        let project = create_project(
            &mut conn,
            &owner.id,
            &team.id,
            ProjectInput {
                name: Some("Sheets".into()),
                start_date: Some(start),
                end_date: Some(start + Duration::days(5)),
                assignee_ids: Some(vec![member.id.clone()]),
                assignee_roles: Some(vec![1]),
                ..ProjectInput::default()
            },
        )
        .unwrap()
        .project;
        Fixture {
            conn,
            owner: owner.id,
            member: member.id,
            team: team.id,
            project: project.id,
        }
    }

    fn sheet(f: &Fixture, by: &str) -> SheetDetail {
        create_sheet(
            &f.conn,
            by,
            &f.team,
            &f.project,
            SheetInput {
                name: Some("Budget".into()),
                ..SheetInput::default()
            },
        )
        .unwrap()
    }

    fn column(f: &Fixture, sheet_id: &str, name: &str) -> ApiResult<Column> {
        add_column(
            &f.conn,
            &f.owner,
            &f.team,
            &f.project,
            sheet_id,
            ColumnInput {
                name: Some(name.to_string()),
                ..ColumnInput::default()
            },
        )
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Due Date!"), "due-date");
        assert_eq!(slugify("  Owner / Lead "), "owner-lead");
        assert_eq!(slugify("???"), "");
    }

    #[test]
    fn test_columns_get_unique_keys_and_order() {
        let f = fixture();
        let s = sheet(&f, &f.owner);
        assert_eq!(s.sheet.sheet_type, SheetType::Spreadsheet);

        let first = column(&f, &s.sheet.id, "Cost").unwrap();
        let second = column(&f, &s.sheet.id, "Cost").unwrap();
        assert_eq!(first.key, "cost");
        assert_eq!(second.key, "cost-2");
        assert_eq!(first.width, DEFAULT_COLUMN_WIDTH);
        assert_eq!((first.position, second.position), (0, 1));

        let clash = add_column(
            &f.conn,
            &f.owner,
            &f.team,
            &f.project,
            &s.sheet.id,
            ColumnInput {
                name: Some("Other".into()),
                key: Some("cost".into()),
                ..ColumnInput::default()
            },
        );
        assert!(matches!(clash, Err(ApiError::Validation(e)) if e.contains_key("key")));
    }

    #[test]
    fn test_bulk_update_and_detail() {
        let mut f = fixture();
        let s = sheet(&f, &f.owner);
        column(&f, &s.sheet.id, "Item").unwrap();
        column(&f, &s.sheet.id, "Cost").unwrap();
        let row = add_row(&f.conn, &f.member, &f.team, &f.project, &s.sheet.id).unwrap();
        assert_eq!(row.position, 0);

        let updates = BulkInput {
            updates: vec![
                json!({ "row_id": row.id, "column_key": "item", "value": "Laptop" }),
                json!({ "row_id": row.id, "column_key": "cost", "value": 1200 }),
            ],
        };
        let (team, project, sheet_id, member) =
            (f.team.clone(), f.project.clone(), s.sheet.id.clone(), f.member.clone());
        let done = bulk_update(&mut f.conn, &member, &team, &project, &sheet_id, updates).unwrap();
        assert_eq!(done.updated, 2);

        let detail = get_sheet(&f.conn, &f.owner, &f.team, &f.project, &s.sheet.id).unwrap();
        assert_eq!(detail.sheet.row_count, 1);
        let cells = &detail.rows[0].cells;
        assert_eq!(cells["item"].value.as_deref(), Some("Laptop"));
        assert_eq!(cells["cost"].value.as_deref(), Some("1200"));

        let cost_id = cells["cost"].id.clone();
        let edited = update_cell(
            &f.conn,
            &f.member,
            &f.team,
            &f.project,
            &s.sheet.id,
            &cost_id,
            CellInput { value: json!("999") },
        )
        .unwrap();
        assert_eq!(edited.value.as_deref(), Some("999"));

        let missing = BulkInput {
            updates: vec![json!({ "row_id": row.id, "value": "x" })],
        };
        assert!(matches!(
            bulk_update(&mut f.conn, &member, &team, &project, &sheet_id, missing),
            Err(ApiError::BadRequest(_))
        ));
        let unknown = BulkInput {
            updates: vec![json!({ "row_id": row.id, "column_key": "nope", "value": "x" })],
        };
        assert!(bulk_update(&mut f.conn, &member, &team, &project, &sheet_id, unknown).is_err());
    }

    #[test]
    fn test_delete_rules_and_comments() {
        let f = fixture();
        let s = sheet(&f, &f.owner);
        assert!(matches!(
            delete_sheet(&f.conn, &f.member, &f.team, &f.project, &s.sheet.id),
            Err(ApiError::Forbidden(_))
        ));

        let comment = |content: &str| SheetCommentInput {
            content: Some(content.to_string()),
            cell_id: None,
            cell: None,
        };
        add_comment(&f.conn, &f.member, &f.team, &f.project, &s.sheet.id, comment("one")).unwrap();
        add_comment(&f.conn, &f.member, &f.team, &f.project, &s.sheet.id, comment("two")).unwrap();
        let listed = list_comments(&f.conn, &f.owner, &f.team, &f.project, &s.sheet.id, None).unwrap();
        assert_eq!(listed[0].content, "two");

        let bad_cell = SheetCommentInput {
            cell_id: Some("nope".into()),
            ..comment("three")
        };
        assert!(add_comment(&f.conn, &f.member, &f.team, &f.project, &s.sheet.id, bad_cell).is_err());

        delete_sheet(&f.conn, &f.owner, &f.team, &f.project, &s.sheet.id).unwrap();
        assert!(list_sheets(&f.conn, &f.owner, &f.team, &f.project).unwrap().is_empty());
    }
}

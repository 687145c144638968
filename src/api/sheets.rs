use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{message, JsonBody};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::sheets::{self, BulkInput, CellInput, ColumnInput, SheetCommentInput, SheetInput};
use crate::server::AppState;

const SHEETS: &str = "/teams/{team_id}/projects/{project_id}/sheets";

type SheetPath = Path<(String, String, String)>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(SHEETS, get(list_sheets).post(create_sheet))
        .route(
            &format!("{SHEETS}/{{sheet_id}}"),
            get(get_sheet).put(update_sheet).patch(update_sheet).delete(delete_sheet),
        )
        .route(&format!("{SHEETS}/{{sheet_id}}/columns"), post(add_column))
        .route(&format!("{SHEETS}/{{sheet_id}}/rows"), post(add_row))
        .route(&format!("{SHEETS}/{{sheet_id}}/cells/bulk"), post(bulk_update))
        .route(
            &format!("{SHEETS}/{{sheet_id}}/cells/{{cell_id}}"),
            patch(update_cell).put(update_cell),
        )
        .route(
            &format!("{SHEETS}/{{sheet_id}}/comments"),
            get(list_comments).post(add_comment),
        )
}

async fn list_sheets(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let sheets = state
        .db
        .call(move |conn| sheets::list_sheets(conn, &user_id, &team_id, &project_id))
        .await?;
    Ok(Json(sheets))
}

async fn create_sheet(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<SheetInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let sheet = state
        .db
        .call(move |conn| sheets::create_sheet(conn, &user_id, &team_id, &project_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(sheet)))
}

async fn get_sheet(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let sheet = state
        .db
        .call(move |conn| sheets::get_sheet(conn, &user_id, &team_id, &project_id, &sheet_id))
        .await?;
    Ok(Json(sheet))
}

async fn update_sheet(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
    JsonBody(input): JsonBody<SheetInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let sheet = state
        .db
        .call(move |conn| {
            sheets::update_sheet(conn, &user_id, &team_id, &project_id, &sheet_id, input)
        })
        .await?;
    Ok(Json(sheet))
}

async fn delete_sheet(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| sheets::delete_sheet(conn, &user_id, &team_id, &project_id, &sheet_id))
        .await?;
    Ok(message("Sheet deleted successfully"))
}

async fn add_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
    JsonBody(input): JsonBody<ColumnInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let column = state
        .db
        .call(move |conn| sheets::add_column(conn, &user_id, &team_id, &project_id, &sheet_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn add_row(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let row = state
        .db
        .call(move |conn| sheets::add_row(conn, &user_id, &team_id, &project_id, &sheet_id))
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_cell(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id, cell_id)): Path<(String, String, String, String)>,
    JsonBody(input): JsonBody<CellInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let cell = state
        .db
        .call(move |conn| {
            sheets::update_cell(conn, &user_id, &team_id, &project_id, &sheet_id, &cell_id, input)
        })
        .await?;
    Ok(Json(cell))
}

async fn bulk_update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
    JsonBody(input): JsonBody<BulkInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let updated = state
        .db
        .call(move |conn| sheets::bulk_update(conn, &user_id, &team_id, &project_id, &sheet_id, input))
        .await?;
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
struct CommentQuery {
    cell_id: Option<String>,
}

async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
    Query(query): Query<CommentQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let comments = state
        .db
        .call(move |conn| {
            sheets::list_comments(
                conn,
                &user_id,
                &team_id,
                &project_id,
                &sheet_id,
                query.cell_id.as_deref(),
            )
        })
        .await?;
    Ok(Json(comments))
}

async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id, sheet_id)): SheetPath,
    JsonBody(input): JsonBody<SheetCommentInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let comment = state
        .db
        .call(move |conn| sheets::add_comment(conn, &user_id, &team_id, &project_id, &sheet_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

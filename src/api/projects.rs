use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{message, JsonBody};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::projects::{self, AddMemberInput, ProjectInput, TransferInput};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams/{team_id}/projects", get(list_projects).post(create_project))
        .route(
            "/teams/{team_id}/projects/{project_id}",
            get(project_detail)
                .put(update_project)
                .patch(update_project)
                .delete(delete_project),
        )
        .route(
            "/teams/{team_id}/projects/{project_id}/members",
            get(list_members).post(add_member),
        )
        .route("/teams/{team_id}/projects/{project_id}/favorite", post(toggle_favorite))
        .route("/teams/{team_id}/projects/{project_id}/transfer", post(transfer_project))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<String>,
}

async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let listing = state
        .db
        .call(move |conn| projects::list_projects(conn, &user_id, &team_id, query.page.as_deref()))
        .await?;
    Ok(Json(listing))
}

async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<ProjectInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let project = state
        .db
        .call(move |conn| projects::create_project(conn, &user_id, &team_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn project_detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let project = state
        .db
        .call(move |conn| projects::project_detail(conn, &user_id, &team_id, &project_id))
        .await?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<ProjectInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let project = state
        .db
        .call(move |conn| projects::update_project(conn, &user_id, &team_id, &project_id, input))
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| projects::delete_project(conn, &user_id, &team_id, &project_id))
        .await?;
    Ok(message("Project deleted successfully"))
}

async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let members = state
        .db
        .call(move |conn| projects::list_members(conn, &user_id, &team_id, &project_id))
        .await?;
    Ok(Json(members))
}

async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<AddMemberInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let member = state
        .db
        .call(move |conn| projects::add_member(conn, &user_id, &team_id, &project_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let toggled = state
        .db
        .call(move |conn| projects::toggle_favorite(conn, &user_id, &team_id, &project_id))
        .await?;
    Ok(Json(toggled))
}

async fn transfer_project(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<TransferInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let transferred = state
        .db
        .call(move |conn| projects::transfer_project(conn, &user_id, &team_id, &project_id, input))
        .await?;
    Ok(Json(transferred))
}

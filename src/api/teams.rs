use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use super::{message, JsonBody};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::teams::{self, MemberQuery, RoleInput, SettingInput, TeamInput};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams", get(list_teams).post(create_team))
        .route(
            "/teams/{team_id}",
            get(team_detail).put(update_team).patch(update_team).delete(delete_team),
        )
        .route("/teams/{team_id}/delete", post(delete_team_confirmed))
        .route("/teams/{team_id}/leave", post(leave_team))
        .route("/teams/{team_id}/members", get(list_members))
        .route("/teams/{team_id}/members/search", get(search_members))
        .route("/teams/{team_id}/members/{member_id}", delete(remove_member))
        .route("/teams/{team_id}/members/{member_id}/remove", post(remove_member))
        .route(
            "/teams/{team_id}/members/{member_id}/update-role",
            post(update_member_role).put(update_member_role).patch(update_member_role),
        )
        .route(
            "/teams/{team_id}/members/{member_id}/transfer-ownership",
            post(transfer_ownership),
        )
        .route("/teams/{team_id}/settings", get(get_settings).put(update_settings))
        .route(
            "/teams/{team_id}/settings/update",
            post(update_setting).patch(update_setting),
        )
}

async fn list_teams(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let teams = state.db.call(move |conn| teams::list_teams(conn, &user_id)).await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(input): JsonBody<TeamInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let team = state
        .db
        .call(move |conn| teams::create_team(conn, &user_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn team_detail(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let team = state
        .db
        .call(move |conn| teams::team_detail(conn, &user_id, &team_id))
        .await?;
    Ok(Json(team))
}

async fn update_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<TeamInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let team = state
        .db
        .call(move |conn| teams::update_team(conn, &user_id, &team_id, input))
        .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| teams::delete_team(conn, &user_id, &team_id))
        .await?;
    Ok(message("Team deleted successfully"))
}

#[derive(Debug, Deserialize)]
struct DeleteConfirmation {
    confirmation_name: Option<String>,
}

async fn delete_team_confirmed(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<DeleteConfirmation>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| {
            teams::delete_team_confirmed(conn, &user_id, &team_id, input.confirmation_name.as_deref())
        })
        .await?;
    Ok(message("Team deleted successfully"))
}

async fn leave_team(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| teams::leave_team(conn, &user_id, &team_id))
        .await?;
    Ok(message("Successfully left the team"))
}

async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let members = state
        .db
        .call(move |conn| teams::list_members(conn, &user_id, &team_id))
        .await?;
    Ok(Json(members))
}

async fn search_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    Query(query): Query<MemberQuery>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let page = state
        .db
        .call(move |conn| teams::search_members(conn, &user_id, &team_id, &query))
        .await?;
    Ok(Json(page))
}

async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| teams::remove_member(conn, &user_id, &team_id, &member_id))
        .await?;
    Ok(message("Member removed successfully"))
}

async fn update_member_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
    JsonBody(input): JsonBody<RoleInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let changed = state
        .db
        .call(move |conn| teams::update_member_role(conn, &user_id, &team_id, &member_id, input))
        .await?;
    Ok(Json(changed))
}

async fn transfer_ownership(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, member_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| teams::transfer_ownership(conn, &user_id, &team_id, &member_id))
        .await?;
    Ok(message("Ownership transferred successfully"))
}

async fn get_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let settings = state
        .db
        .call(move |conn| teams::get_settings(conn, &user_id, &team_id))
        .await?;
    Ok(Json(settings))
}

async fn update_settings(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(patch): JsonBody<Value>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let settings = state
        .db
        .call(move |conn| teams::update_settings(conn, &user_id, &team_id, &patch))
        .await?;
    Ok(Json(settings))
}

async fn update_setting(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<SettingInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let updated = state
        .db
        .call(move |conn| teams::update_setting(conn, &user_id, &team_id, input))
        .await?;
    Ok(Json(updated))
}

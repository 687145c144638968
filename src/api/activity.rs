use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use super::int_param;
use crate::auth::AuthUser;
use crate::domain::ActionType;
use crate::error::{ApiError, ApiResult};
use crate::ops::activity;
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams/{team_id}/activity", get(team_activity))
        .route("/teams/{team_id}/activity/recent", get(recent_activity))
        .route(
            "/teams/{team_id}/projects/{project_id}/activity",
            get(project_activity),
        )
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    action_type: Option<String>,
    days: Option<String>,
    limit: Option<String>,
}

async fn team_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<impl IntoResponse> {
    let action_type = match query.action_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            ActionType::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid action_type"))?,
        ),
    };
    let days = int_param("days", query.days.as_deref())?;
    let user_id = auth.user.id;
    let entries = state
        .db
        .call(move |conn| activity::team_activity(conn, &user_id, &team_id, action_type, days))
        .await?;
    Ok(Json(entries))
}

async fn project_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, project_id)): Path<(String, String)>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<impl IntoResponse> {
    let days = int_param("days", query.days.as_deref())?;
    let user_id = auth.user.id;
    let entries = state
        .db
        .call(move |conn| activity::project_activity(conn, &user_id, &team_id, &project_id, days))
        .await?;
    Ok(Json(entries))
}

async fn recent_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = int_param("limit", query.limit.as_deref())?;
    let user_id = auth.user.id;
    let entries = state
        .db
        .call(move |conn| activity::recent_activity(conn, &user_id, &team_id, limit))
        .await?;
    Ok(Json(entries))
}

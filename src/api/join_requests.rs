use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::{message, JsonBody};
use crate::auth::rate_limiter::JOIN_REQUEST;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::ops::join_requests::{self, JoinRequestInput};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams/{team_id}/join-request", post(request_to_join))
        .route("/teams/{team_id}/join-requests", get(list_pending))
        .route("/teams/{team_id}/join-requests/{request_id}/approve", post(approve))
        .route("/teams/{team_id}/join-requests/{request_id}/reject", post(reject))
}

/// Public; throttled per email address.
async fn request_to_join(
    State(state): State<AppState>,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<JoinRequestInput>,
) -> ApiResult<impl IntoResponse> {
    let identity = input.email.clone().unwrap_or_default();
    if !state.limiter.lock().await.check(JOIN_REQUEST, identity.trim()) {
        return Err(ApiError::TooManyRequests);
    }
    let created = state
        .db
        .call(move |conn| join_requests::request_to_join(conn, &team_id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_pending(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let requests = state
        .db
        .call(move |conn| join_requests::list_pending(conn, &user_id, &team_id))
        .await?;
    Ok(Json(requests))
}

async fn approve(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, request_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| join_requests::approve(conn, &user_id, &team_id, &request_id))
        .await?;
    Ok(message("Join request approved"))
}

async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((team_id, request_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| join_requests::reject(conn, &user_id, &team_id, &request_id))
        .await?;
    Ok(message("Join request rejected"))
}

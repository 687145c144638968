use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use super::message;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::notifications;
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/{notification_id}", delete(remove))
        .route("/notifications/{notification_id}/read", post(mark_read))
}

async fn list(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let items = state
        .db
        .call(move |conn| notifications::list(conn, &user_id))
        .await?;
    Ok(Json(items))
}

async fn unread_count(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let count = state
        .db
        .call(move |conn| notifications::unread_count(conn, &user_id))
        .await?;
    Ok(Json(json!({ "unread_count": count })))
}

async fn mark_read(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| notifications::mark_read(conn, &user_id, &notification_id))
        .await?;
    Ok(message("Notification marked as read"))
}

async fn mark_all_read(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| notifications::mark_all_read(conn, &user_id))
        .await?;
    Ok(message("All notifications marked as read"))
}

async fn remove(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(notification_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    state
        .db
        .call(move |conn| notifications::delete(conn, &user_id, &notification_id))
        .await?;
    Ok(message("Notification deleted"))
}

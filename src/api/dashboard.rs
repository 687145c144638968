use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::ops::dashboard;
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard_view))
}

async fn dashboard_view(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let board = state
        .db
        .call(move |conn| dashboard::dashboard(conn, &user_id, Utc::now()))
        .await?;
    Ok(Json(board))
}

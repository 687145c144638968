use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::{message, JsonBody};
use crate::auth::rate_limiter::LOGIN;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::ops::accounts::{self, LoginInput, ProfileInput, RegisterInput};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(profile).patch(update_profile).put(update_profile))
        .route("/check-availability", get(check_availability))
}

async fn register(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<RegisterInput>,
) -> ApiResult<impl IntoResponse> {
    let created = state.db.call(move |conn| accounts::register(conn, input)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(input): JsonBody<LoginInput>,
) -> ApiResult<impl IntoResponse> {
    let identity = input.email_or_username.clone().unwrap_or_default();
    if !state.limiter.lock().await.check(LOGIN, identity.trim()) {
        return Err(ApiError::TooManyRequests);
    }
    let session = state.db.call(move |conn| accounts::login(conn, input)).await?;
    Ok(Json(session))
}

async fn logout(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let token = auth.token;
    state.db.call(move |conn| accounts::logout(conn, &token)).await?;
    Ok(message("Logout successful"))
}

async fn profile(auth: AuthUser) -> impl IntoResponse {
    Json(auth.user)
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(input): JsonBody<ProfileInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let user = state
        .db
        .call(move |conn| accounts::update_profile(conn, &user_id, input))
        .await?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    email: Option<String>,
    username: Option<String>,
}

async fn check_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<impl IntoResponse> {
    let result = state
        .db
        .call(move |conn| {
            accounts::check_availability(conn, query.email.as_deref(), query.username.as_deref())
        })
        .await?;
    Ok(Json(result))
}

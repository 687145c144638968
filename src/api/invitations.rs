use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{message, JsonBody};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::mailer::invitation_email;
use crate::ops::invitations::{self, InviteInput};
use crate::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/teams/{team_id}/invite", post(invite))
        .route("/invitations/pending", get(pending))
        .route("/invitations/check-pending", get(check_pending))
        .route("/invitations/accept-pending", post(accept_all_pending))
        .route("/invitations/{token}/accept", post(accept))
        .route("/invitations/{token}/reject", post(reject))
        .route("/invitations/public/{token}", get(public_details))
        .route("/invitations/public/{token}/accept", get(public_accept).post(public_accept))
        .route("/invitations/public/{token}/reject", post(public_reject))
}

async fn invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(team_id): Path<String>,
    JsonBody(input): JsonBody<InviteInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = auth.user.id;
    let ttl_days = state.config.invite_ttl_days;
    let created = state
        .db
        .call(move |conn| invitations::invite(conn, &user_id, &team_id, input, Utc::now(), ttl_days))
        .await?;

    let invitation = &created.invitation;
    let email = invitation_email(
        &invitation.email,
        &created.inviter_name,
        &invitation.team_name,
        &invitation.token,
        &state.config.frontend_url,
        ttl_days,
    );
    let email_sent = match state.mailer.send(&email).await {
        Ok(sent) => sent,
        Err(e) => {
            warn!("Invitation email to {} failed: {:#}", invitation.email, e);
            false
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Invitation sent successfully",
            "invitation_id": invitation.id,
            "email_sent": email_sent,
            "user_exists": created.user_exists,
        })),
    ))
}

async fn pending(State(state): State<AppState>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let email = auth.user.email;
    let pending = state
        .db
        .call(move |conn| invitations::pending_for_email(conn, &email, Utc::now()))
        .await?;
    Ok(Json(pending))
}

#[derive(Debug, Deserialize)]
struct EmailQuery {
    email: Option<String>,
}

async fn check_pending(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> ApiResult<impl IntoResponse> {
    let check = state
        .db
        .call(move |conn| invitations::check_pending(conn, query.email.as_deref(), Utc::now()))
        .await?;
    Ok(Json(check))
}

async fn accept_all_pending(_auth: AuthUser) -> ApiResult<()> {
    invitations::accept_all_pending()
}

async fn accept(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.user;
    let accepted = state
        .db
        .call(move |conn| invitations::accept(conn, &user, &token, Utc::now()))
        .await?;
    Ok(Json(accepted))
}

async fn reject(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.user;
    state
        .db
        .call(move |conn| invitations::reject(conn, &user, &token, Utc::now()))
        .await?;
    Ok(message("Invitation rejected"))
}

async fn public_details(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let invitation = state
        .db
        .call(move |conn| invitations::public_details(conn, &token, Utc::now()))
        .await?;
    Ok(Json(invitation))
}

async fn public_accept(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .db
        .call(move |conn| invitations::public_accept(conn, &token, Utc::now()))
        .await?;
    let status = if outcome.is_failure() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

async fn public_reject(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .db
        .call(move |conn| invitations::public_reject(conn, &token, Utc::now()))
        .await?;
    Ok(message("Invitation declined"))
}

//! Authentication
//!
//! Opaque per-user tokens sent as `Authorization: Token <key>` (or
//! `Bearer <key>`), salted password hashes and login throttling.

pub mod password;
pub mod rate_limiter;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use tracing::debug;

use crate::error::ApiError;
use crate::server::AppState;
use crate::store::users::{self, User};

/// The authenticated caller. Extracting it rejects the request with 401
/// when the token is missing, unknown or belongs to a disabled account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

/// Pull the key out of an `Authorization` header value.
pub fn parse_authorization(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        Some(key)
    } else {
        None
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_authorization)
            .map(str::to_string)
            .ok_or(ApiError::Unauthorized)?;

        let key = token.clone();
        let user = state
            .db
            .call(move |conn| {
                let Some(user) = users::user_for_token(conn, &key)? else {
                    return Ok(None);
                };
                if user.is_active {
                    users::touch_last_active(conn, &user.id)?;
                }
                Ok(Some(user))
            })
            .await?;

        match user {
            Some(user) if user.is_active => Ok(AuthUser { user, token }),
            Some(user) => {
                debug!("Rejected token for disabled account {}", user.id);
                Err(ApiError::Unauthorized)
            }
            None => Err(ApiError::Unauthorized),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authorization() {
        assert_eq!(parse_authorization("Token abc123"), Some("abc123"));
        assert_eq!(parse_authorization("Bearer  abc123 "), Some("abc123"));
        assert_eq!(parse_authorization("bearer abc"), Some("abc"));
        assert_eq!(parse_authorization("Basic abc"), None);
        assert_eq!(parse_authorization("Token "), None);
        assert_eq!(parse_authorization("abc123"), None);
    }
}

//! HTTP Surface
//!
//! Thin axum handlers: extract the caller and the body, hop onto the
//! database thread with an `ops` call, shape the response.

mod accounts;
mod activity;
mod dashboard;
mod invitations;
mod join_requests;
mod notifications;
mod projects;
mod sheets;
mod tasks;
mod teams;

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::Json;
use axum::Router;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// JSON request body whose rejections use the API error shape.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

pub(crate) fn message(text: impl Into<String>) -> Json<Value> {
    Json(json!({ "message": text.into() }))
}

/// Parse an optional integer query parameter, 400 when malformed.
pub(crate) fn int_param(name: &str, raw: Option<&str>) -> ApiResult<Option<i64>> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("Invalid value for {}", name))),
    }
}

/// Every endpoint, relative to `/api`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(accounts::routes())
        .merge(teams::routes())
        .merge(invitations::routes())
        .merge(join_requests::routes())
        .merge(projects::routes())
        .merge(tasks::routes())
        .merge(sheets::routes())
        .merge(notifications::routes())
        .merge(activity::routes())
        .merge(dashboard::routes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_param() {
        assert_eq!(int_param("days", None).unwrap(), None);
        assert_eq!(int_param("days", Some(" ")).unwrap(), None);
        assert_eq!(int_param("days", Some("7")).unwrap(), Some(7));
        assert!(matches!(
            int_param("days", Some("week")),
            Err(ApiError::BadRequest(_))
        ));
    }
}

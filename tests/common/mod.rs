#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use teamspace::config::ServerConfig;
use teamspace::db::Db;
use teamspace::mailer::LogMailer;
use teamspace::server::{router, AppState};

/// A router over a fresh on-disk database, with the mail outbox exposed.
pub struct TestApp {
    pub app: Router,
    pub mailer: Arc<LogMailer>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("teamspace.db")).unwrap();
        let mailer = Arc::new(LogMailer::new());
        let config = ServerConfig {
            frontend_url: "http://app.test".to_string(),
            login_burst: 3,
            ..ServerConfig::default()
        };
        let state = AppState::new(db, config, mailer.clone());
        Self {
            app: router(state),
            mailer,
            _dir: dir,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Token {}", token));
        }
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };
        self.send_raw(request.body(body).unwrap()).await
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    /// Register an account and return its token.
    pub async fn register(&self, name: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/register",
                None,
                Some(json!({
                    "email": format!("{}@example.com", name),
                    "password": "correct-horse",
                    "password_confirm": "correct-horse",
                    "first_name": name,
                    "last_name": "Tester",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Create a team and return its id.
    pub async fn create_team(&self, token: &str, name: &str) -> String {
        let (status, body) = self.post("/api/teams", token, json!({ "name": name })).await;
        assert_eq!(status, StatusCode::CREATED, "team create failed: {}", body);
        body["id"].as_str().unwrap().to_string()
    }

    /// Token of the most recent invitation email.
    pub fn last_invitation_token(&self) -> String {
        let outbox = self.mailer.outbox();
        let email = outbox.last().expect("no invitation email sent");
        email
            .text
            .split("/invitation/accept/")
            .nth(1)
            .and_then(|rest| rest.lines().next())
            .expect("accept link missing")
            .trim()
            .to_string()
    }
}

//! HTTP Server
//!
//! Shared application state, the `/api` router and the serve loop.

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::auth::rate_limiter::RateLimiter;
use crate::config::ServerConfig;
use crate::db::Db;
use crate::mailer::{HttpMailer, LogMailer, Mailer};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<ServerConfig>,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: Arc<Mutex<RateLimiter>>,
}

impl AppState {
    pub fn new(db: Db, config: ServerConfig, mailer: Arc<dyn Mailer>) -> Self {
        let limiter = RateLimiter::new(config.login_burst);
        Self {
            db,
            config: Arc::new(config),
            mailer,
            limiter: Arc::new(Mutex::new(limiter)),
        }
    }

    /// Open the configured database and pick a mailer.
    pub fn from_config(config: ServerConfig) -> Result<Self> {
        let db = Db::open(&config.db_path)
            .with_context(|| format!("Failed to open database at {}", config.db_path))?;
        let mailer: Arc<dyn Mailer> = match config.mail.clone() {
            Some(mail) => Arc::new(HttpMailer::new(mail)),
            None => {
                info!("No mail API configured, invitation emails will only be logged");
                Arc::new(LogMailer::new())
            }
        };
        Ok(Self::new(db, config, mailer))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let addr = config.bind_addr.clone();
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Teamspace API listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

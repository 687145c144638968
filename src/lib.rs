//! Teamspace
//!
//! JSON backend for team collaboration: accounts, teams and membership,
//! invitations, join requests, projects with tasks and sheets,
//! notifications and an activity feed.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod mailer;
pub mod ops;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod utils;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use server::{router, run_server, AppState};

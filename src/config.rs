//! Server Configuration
//!
//! Read once at startup from the environment (after `.env` is loaded).

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: String,
    /// Base URL used to build links in emails and notifications.
    pub frontend_url: String,
    pub invite_ttl_days: i64,
    pub mail: Option<MailConfig>,
    /// Login attempts allowed per identity per minute.
    pub login_burst: u32,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            db_path: "teamspace.db".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            invite_ttl_days: 7,
            mail: None,
            login_burst: 10,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let mail = match (
            env::var("TEAMSPACE_MAIL_API_URL").ok(),
            env::var("TEAMSPACE_MAIL_API_KEY").ok(),
        ) {
            (Some(api_url), Some(api_key)) if !api_key.is_empty() => Some(MailConfig {
                api_url,
                api_key,
                sender: env::var("TEAMSPACE_MAIL_SENDER")
                    .unwrap_or_else(|_| "noreply@teamspace.local".to_string()),
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: env::var("TEAMSPACE_BIND").unwrap_or(defaults.bind_addr),
            db_path: env::var("TEAMSPACE_DB_PATH").unwrap_or(defaults.db_path),
            frontend_url: env::var("TEAMSPACE_FRONTEND_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.frontend_url),
            invite_ttl_days: parse_var("TEAMSPACE_INVITE_TTL_DAYS", defaults.invite_ttl_days)?,
            mail,
            login_burst: parse_var("TEAMSPACE_LOGIN_BURST", defaults.login_burst)?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

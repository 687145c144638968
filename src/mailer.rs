//! Transactional Email
//!
//! Invitation emails go out through a JSON mail API when one is configured;
//! otherwise they are logged and kept in a small in-memory outbox.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::config::MailConfig;

const OUTBOX_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns whether the message was accepted for delivery.
    async fn send(&self, email: &OutgoingEmail) -> Result<bool>;
}

/// Plain-text invitation with accept and decline links.
pub fn invitation_email(
    to: &str,
    inviter_name: &str,
    team_name: &str,
    token: &str,
    frontend_url: &str,
    ttl_days: i64,
) -> OutgoingEmail {
    let accept_url = format!("{}/invitation/accept/{}", frontend_url, token);
    let reject_url = format!("{}/invitation/reject/{}", frontend_url, token);
    let text = format!(
        "Hello!\n\n\
         {inviter} has invited you to join {team} on Teamspace.\n\n\
         Accept the invitation:\n{accept}\n\n\
         Decline the invitation:\n{reject}\n\n\
         This invitation will expire in {days} day{plural}.\n",
        inviter = inviter_name,
        team = team_name,
        accept = accept_url,
        reject = reject_url,
        days = ttl_days,
        plural = if ttl_days == 1 { "" } else { "s" },
    );
    OutgoingEmail {
        to: to.to_string(),
        subject: format!("{} has invited you to join {}", inviter_name, team_name),
        text,
    }
}

pub struct HttpMailer {
    client: Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<bool> {
        let payload = json!({
            "sender": { "name": "Teamspace", "email": self.config.sender },
            "to": [{ "email": email.to }],
            "subject": email.subject,
            "textContent": email.text,
        });

        let response = self
            .client
            .post(&self.config.api_url)
            .header("api-key", &self.config.api_key)
            .header("accept", "application/json")
            .json(&payload)
            .send()
            .await
            .context("Failed to reach mail API")?;

        let status = response.status();
        if matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            info!("Invitation email sent to {}", email.to);
            Ok(true)
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!("Mail API rejected message to {}: {} {}", email.to, status, body);
            Ok(false)
        }
    }
}

/// Logs messages instead of delivering them.
#[derive(Default)]
pub struct LogMailer {
    outbox: Mutex<VecDeque<OutgoingEmail>>,
}

impl LogMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent messages, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox
            .lock()
            .map(|outbox| outbox.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<bool> {
        info!(to = %email.to, subject = %email.subject, "Mail delivery disabled, message logged");
        if let Ok(mut outbox) = self.outbox.lock() {
            if outbox.len() >= OUTBOX_LIMIT {
                outbox.pop_front();
            }
            outbox.push_back(email.clone());
        }
        Ok(false)
    }
}

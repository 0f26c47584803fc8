use crate::config::NotifyConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no recipients configured")]
    NoRecipients,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Outbound message transport for digests.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError>;
}

/// Writes messages to the log. Used when no transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
        info!("[notify] to={:?} subject={:?}\n{}", recipients, subject, body);
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    subject: &'a str,
    body: &'a str,
    recipients: &'a [String],
}

/// POSTs each message as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let resp = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                subject,
                body,
                recipients,
            })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(NotifyError::Delivery(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }
}

pub fn from_config(cfg: &NotifyConfig) -> Result<Arc<dyn Notifier>> {
    Ok(match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    })
}

/// Fire-and-forget delivery: failures are logged and never surface.
pub async fn deliver(notifier: &dyn Notifier, subject: &str, body: &str, recipients: &[String]) {
    if let Err(e) = notifier.send(subject, body, recipients).await {
        warn!("Failed to send {:?}: {}", subject, e);
    }
}

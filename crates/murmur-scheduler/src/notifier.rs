//! Outbound delivery of reminder text.
//!
//! A [`Destination`] with a group id goes to that group mentioning the
//! user; a group id of 0 means a private message to the user.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use murmur_core::types::Destination;

use crate::error::NotifyError;

/// Sends text to a chat destination.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, destination: Destination, text: &str) -> Result<(), NotifyError>;
}

/// Writes deliveries to the log. Used when no transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, destination: Destination, text: &str) -> Result<(), NotifyError> {
        info!(destination = %destination, text = %text, "Notification delivered");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    group_id: i64,
    user_id: i64,
    message: &'a str,
}

/// Posts each delivery as JSON to a chat bridge.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            url: url.into(),
            http_client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, destination: Destination, text: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            group_id: destination.group_id,
            user_id: destination.user_id,
            message: text,
        };
        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        info!(destination = %destination, "Notification posted to webhook");
        Ok(())
    }
}

/// Keeps every delivery in memory. Can be switched to fail on demand.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Destination, String)>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries accepted so far, in order.
    pub fn sent(&self) -> Vec<(Destination, String)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, destination: Destination, text: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("recording notifier is failing".to_string()));
        }
        self.sent
            .lock()
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .push((destination, text.to_string()));
        Ok(())
    }
}

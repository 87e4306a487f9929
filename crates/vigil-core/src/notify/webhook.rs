//! Generic JSON webhook delivery

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::{Notification, NotificationDispatcher, NotificationError};

/// POSTs each notification as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    headers: HashMap<String, String>,
}

impl WebhookDispatcher {
    /// Create a webhook dispatcher
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    /// Add a header sent with every request
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            notification,
            sent_at: Utc::now(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected(format!(
                "webhook returned {status}: {body}"
            )));
        }

        info!(url = %self.url, kind = ?notification.kind, "Webhook notification sent");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    #[serde(flatten)]
    notification: &'a Notification,
    sent_at: DateTime<Utc>,
}

//! Notification delivery
//!
//! Alert and capacity events leave the engine as [`Notification`]s handed to a
//! [`NotificationDispatcher`]. Delivery is fire-and-forget: a failed send is
//! logged and never unwinds the state change that produced it.

mod webhook;

pub use webhook::WebhookDispatcher;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::models::Severity;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// An alert started firing
    AlertFired,
    /// A firing alert resolved
    AlertResolved,
    /// A resource reached its warning level
    CapacityWarning,
    /// A resource reached its critical level
    CapacityCritical,
    /// A resource is forecast to reach critical soon
    ForecastCritical,
}

/// A structured event for the outside world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// What happened
    pub kind: NotificationKind,
    /// Short headline
    pub title: String,
    /// Human-readable detail
    pub message: String,
    /// Severity
    pub severity: Severity,
    /// Structured fields
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Notification {
    /// Create a notification with no data
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            severity,
            data: Map::new(),
        }
    }

    /// Attach a data field
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The request could not be sent
    #[error("HTTP error: {0}")]
    Http(String),

    /// The receiver answered with an error
    #[error("Rejected by receiver: {0}")]
    Rejected(String),
}

/// Delivers notifications somewhere
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Deliver one notification
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Send and log the outcome; failures are swallowed
pub(crate) async fn dispatch(dispatcher: &dyn NotificationDispatcher, notification: Notification) {
    if let Err(e) = dispatcher.send(&notification).await {
        warn!(
            kind = ?notification.kind,
            title = %notification.title,
            error = %e,
            "Notification delivery failed"
        );
    }
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait::async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            kind = ?notification.kind,
            severity = %notification.severity,
            title = %notification.title,
            data = %serde_json::Value::Object(notification.data.clone()),
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Delivers to several dispatchers
///
/// Every dispatcher is tried; the first failure is reported after all have run.
#[derive(Default)]
pub struct FanoutDispatcher {
    dispatchers: Vec<Box<dyn NotificationDispatcher>>,
}

impl FanoutDispatcher {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dispatcher
    #[must_use]
    pub fn with(mut self, dispatcher: impl NotificationDispatcher + 'static) -> Self {
        self.dispatchers.push(Box::new(dispatcher));
        self
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for FanoutDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut first_error = None;

        for dispatcher in &self.dispatchers {
            if let Err(e) = dispatcher.send(notification).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records every notification; optionally fails each send
    #[derive(Clone, Default)]
    pub struct RecordingDispatcher {
        pub sent: Arc<Mutex<Vec<Notification>>>,
        pub fail: bool,
    }

    impl RecordingDispatcher {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn kinds(&self) -> Vec<NotificationKind> {
            self.sent.lock().iter().map(|n| n.kind).collect()
        }
    }

    #[async_trait::async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
            self.sent.lock().push(notification.clone());
            if self.fail {
                return Err(NotificationError::Rejected("test failure".to_string()));
            }
            Ok(())
        }
    }
}

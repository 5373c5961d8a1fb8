//! Notification Port
//!
//! Delivery (push, SMS, email) is owned by another subsystem. The core only
//! hands messages to this port and never waits on or retries delivery.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Structured payload for the delivery channel
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

#[trait_variant::make(NotificationPort: Send)]
pub trait LocalNotificationPort {
    /// Send to every member of a named recipient group
    async fn notify(
        &self,
        recipient_group: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError>;
}

/// Deliver and log the failure, if any
pub async fn notify_and_forget<N>(port: &N, recipient_group: &str, notification: &Notification)
where
    N: NotificationPort + Sync,
{
    if let Err(e) = port.notify(recipient_group, notification).await {
        tracing::warn!(
            error = %e,
            recipient_group = recipient_group,
            title = %notification.title,
            "Notification dropped"
        );
    }
}

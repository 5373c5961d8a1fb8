//! Logging Notifier
//!
//! Default [`NotificationPort`] when no delivery channel is wired in: the
//! message is written to the log and dropped.

use crate::domain::notification::{Notification, NotificationError, NotificationPort};

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationPort for TracingNotifier {
    async fn notify(
        &self,
        recipient_group: &str,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            recipient_group = recipient_group,
            title = %notification.title,
            body = %notification.body,
            data = %notification.data,
            "Notification"
        );
        Ok(())
    }
}

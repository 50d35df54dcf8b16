//! Post-commit notification dispatch.
//!
//! Notifications go out only after the financial transaction committed. They
//! run on their own task with bounded retry; a failure is logged and counted
//! and never reaches the caller of the booking or refund operation.

use crate::metrics;
use crate::retry::{RetryPolicy, retry_if};
use async_trait::async_trait;
use std::sync::Arc;
use tutoring_core::{Notification, Notifier, NotifyError};

/// Fire-and-forget sender wrapping a [`Notifier`].
#[derive(Clone)]
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self { notifier, policy }
    }

    /// Deliver in the background without waiting for the outcome.
    pub fn dispatch(&self, notification: Notification) {
        let this = self.clone();
        tokio::spawn(async move { this.deliver(notification).await });
    }

    /// Deliver with retry, logging the outcome. Returns `true` on success.
    pub async fn deliver(&self, notification: Notification) -> bool {
        let user_id = notification.user_id;
        let title = notification.title.clone();
        let result = retry_if(
            &self.policy,
            || self.notifier.send(notification.clone()),
            NotifyError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(%user_id, %title, "Notification sent");
                metrics::record_notification("sent");
                true
            }
            Err(error) => {
                tracing::warn!(%user_id, %title, %error, "Notification dropped");
                metrics::record_notification("failed");
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Notifier that writes every notification to the log.
///
/// Used when no delivery channel is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            user_id = %notification.user_id,
            title = %notification.title,
            message = %notification.message,
            data = %notification.data,
            "Notification"
        );
        Ok(())
    }
}

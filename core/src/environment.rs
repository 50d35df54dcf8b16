//! Injected dependencies: time and outbound notifications.
//!
//! Services never call `Utc::now()` or talk to a delivery channel directly;
//! they receive these collaborators so tests can pin the clock and observe
//! what would have been sent.

use crate::types::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use tutoring_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let _now = clock.now();
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Payload handed to the notification collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient
    pub user_id: UserId,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Structured payload for the client (booking id, refund amount, ...)
    pub data: serde_json::Value,
}

impl Notification {
    /// Creates a notification with an empty data payload.
    #[must_use]
    pub fn new(user_id: UserId, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Delivery failure reported by a [`Notifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel is temporarily unavailable; a retry may succeed.
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    /// The notification was refused and should not be retried.
    #[error("Notification rejected: {0}")]
    Rejected(String),
}

impl NotifyError {
    /// Whether retrying could help.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Outbound notification channel (push, email, in-app).
///
/// Called only after the financial transaction has committed.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if delivery failed.
    async fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}

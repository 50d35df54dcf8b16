//! Cancellation refund policy.
//!
//! | cancelled by | notice                   | refund |
//! |--------------|--------------------------|--------|
//! | teacher      | any                      | 100%   |
//! | student      | `>= full_notice_hours`   | 100%   |
//! | student      | less, or already started | `late_percent` (50%) |
//!
//! The refund is `floor(credits_paid * percent / 100)` so it can never exceed
//! what was escrowed.

use crate::types::{Credits, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tunable policy constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    /// Minimum notice (hours) for a student to get a full refund
    pub full_notice_hours: i64,
    /// Percent refunded to a student cancelling late
    pub late_percent: u8,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_notice_hours: 24,
            late_percent: 50,
        }
    }
}

/// Computed refund for one cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundQuote {
    /// Percent of `credits_paid` refunded
    pub percent: u8,
    /// Credits to move back to the student
    pub amount: Credits,
    /// Notice given, in fractional hours (negative once the session started)
    pub hours_until_session: f64,
}

impl RefundPolicy {
    /// Percent refunded for a cancellation by `cancelled_by` with the given notice.
    #[must_use]
    pub fn percent(&self, cancelled_by: Role, hours_until_session: f64) -> u8 {
        #[allow(clippy::cast_precision_loss)] // notice thresholds are small whole hours
        let threshold = self.full_notice_hours as f64;
        match cancelled_by {
            Role::Teacher => 100,
            Role::Student if hours_until_session >= threshold => 100,
            Role::Student => self.late_percent.min(100),
        }
    }

    /// Quote a refund. Both instants are UTC; no local-time arithmetic happens.
    #[must_use]
    pub fn quote(
        &self,
        cancelled_by: Role,
        credits_paid: Credits,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RefundQuote {
        #[allow(clippy::cast_precision_loss)]
        let hours_until_session = (scheduled_at - now).num_seconds() as f64 / 3600.0;
        let percent = self.percent(cancelled_by, hours_until_session);
        RefundQuote {
            percent,
            amount: credits_paid.percent_floor(percent),
            hours_until_session,
        }
    }
}

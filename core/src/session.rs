//! Session (meeting) lifecycle.
//!
//! ```text
//! SCHEDULED ──open──► LIVE ──close──► ENDED
//!     │                 │
//!     └──────cancel─────┴──► CANCELLED
//! ```
//!
//! Transitions are computed here and persisted with a compare-and-set on the
//! previous status, so two sweeps racing on the same session cannot both apply.

use crate::error::{Error, Result};
use crate::types::SessionId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Booked, not yet started
    Scheduled,
    /// In progress
    Live,
    /// Finished (terminal)
    Ended,
    /// Cancelled through the refund path (terminal)
    Cancelled,
}

impl SessionStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Ended => "ended",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "live" => Ok(Self::Live),
            "ended" => Ok(Self::Ended),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Storage(format!("invalid session status: {other}"))),
        }
    }
}

/// Who caused a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// The periodic scheduler sweep
    Scheduler,
    /// An operator calling the manual endpoint
    Manual,
}

impl Trigger {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Manual => "manual",
        }
    }
}

/// A tutoring session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub id: SessionId,
    /// Current status
    pub status: SessionStatus,
    /// Scheduled start (UTC)
    pub scheduled_at: DateTime<Utc>,
    /// Planned length in minutes
    pub duration_minutes: i64,
    /// When the session went live
    pub opened_at: Option<DateTime<Utc>>,
    /// When the session ended
    pub closed_at: Option<DateTime<Utc>>,
    /// Opened by the scheduler rather than an operator
    pub auto_opened: bool,
    /// Closed by the scheduler rather than an operator
    pub auto_closed: bool,
}

impl Session {
    /// A new scheduled session.
    #[must_use]
    pub fn scheduled(scheduled_at: DateTime<Utc>, duration_minutes: i64) -> Self {
        Self {
            id: SessionId::new(),
            status: SessionStatus::Scheduled,
            scheduled_at,
            duration_minutes,
            opened_at: None,
            closed_at: None,
            auto_opened: false,
            auto_closed: false,
        }
    }

    /// Nominal end: start plus duration.
    #[must_use]
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.scheduled_at + Duration::minutes(self.duration_minutes)
    }

    /// Compute the LIVE state.
    ///
    /// Returns `Ok(None)` when the session is already LIVE or ENDED: opening is
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a cancelled session.
    pub fn open(&self, now: DateTime<Utc>, trigger: Trigger) -> Result<Option<Self>> {
        match self.status {
            SessionStatus::Scheduled => Ok(Some(Self {
                status: SessionStatus::Live,
                opened_at: Some(now),
                auto_opened: trigger == Trigger::Scheduler,
                ..self.clone()
            })),
            SessionStatus::Live | SessionStatus::Ended => Ok(None),
            SessionStatus::Cancelled => Err(Error::Validation(format!(
                "session {} is cancelled and cannot be opened",
                self.id
            ))),
        }
    }

    /// Compute the ENDED state.
    ///
    /// Returns `Ok(None)` when the session has already ended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a cancelled session.
    pub fn close(&self, now: DateTime<Utc>, trigger: Trigger) -> Result<Option<Self>> {
        match self.status {
            SessionStatus::Scheduled | SessionStatus::Live => Ok(Some(Self {
                status: SessionStatus::Ended,
                closed_at: Some(now),
                auto_closed: trigger == Trigger::Scheduler,
                ..self.clone()
            })),
            SessionStatus::Ended => Ok(None),
            SessionStatus::Cancelled => Err(Error::Validation(format!(
                "session {} is cancelled and cannot be closed",
                self.id
            ))),
        }
    }

    /// Compute the CANCELLED state. `None` when already cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an ended session.
    pub fn cancel(&self) -> Result<Option<Self>> {
        match self.status {
            SessionStatus::Scheduled | SessionStatus::Live => Ok(Some(Self {
                status: SessionStatus::Cancelled,
                ..self.clone()
            })),
            SessionStatus::Cancelled => Ok(None),
            SessionStatus::Ended => Err(Error::Validation(format!(
                "session {} has ended and cannot be cancelled",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2025-03-10T{hour:02}:00:00Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn open_then_close() {
        let session = Session::scheduled(at(10), 60);
        assert_eq!(session.ends_at(), at(11));

        let live = session.open(at(10), Trigger::Scheduler).unwrap().unwrap();
        assert_eq!(live.status, SessionStatus::Live);
        assert_eq!(live.opened_at, Some(at(10)));
        assert!(live.auto_opened);

        let ended = live.close(at(11), Trigger::Manual).unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.closed_at, Some(at(11)));
        assert!(!ended.auto_closed);
    }

    #[test]
    fn transitions_are_idempotent() {
        let live = Session::scheduled(at(10), 60)
            .open(at(10), Trigger::Manual)
            .unwrap()
            .unwrap();
        assert_eq!(live.open(at(10), Trigger::Manual).unwrap(), None);

        let ended = live.close(at(11), Trigger::Scheduler).unwrap().unwrap();
        assert_eq!(ended.close(at(12), Trigger::Scheduler).unwrap(), None);
        assert_eq!(ended.open(at(12), Trigger::Scheduler).unwrap(), None);
    }

    #[test]
    fn scheduled_session_can_close_directly() {
        let ended = Session::scheduled(at(10), 60)
            .close(at(12), Trigger::Scheduler)
            .unwrap()
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert_eq!(ended.opened_at, None);
    }

    #[test]
    fn cancelled_session_rejects_lifecycle() {
        let cancelled = Session::scheduled(at(10), 60).cancel().unwrap().unwrap();
        assert!(cancelled.open(at(10), Trigger::Manual).is_err());
        assert!(cancelled.close(at(10), Trigger::Manual).is_err());
        assert_eq!(cancelled.cancel().unwrap(), None);
    }

    #[test]
    fn status_parses() {
        for status in [
            SessionStatus::Scheduled,
            SessionStatus::Live,
            SessionStatus::Ended,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }
}

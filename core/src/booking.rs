//! The booking aggregate: one student holding one slot and one session.

use crate::error::{Error, Result};
use crate::types::{BookingId, Credits, Role, SessionId, SlotId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Booking status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Created but not yet confirmed
    Pending,
    /// Paid and holding its slot
    Confirmed,
    /// Cancelled and refunded (terminal)
    Cancelled,
    /// Session took place (terminal)
    Completed,
    /// Student did not attend (terminal)
    NoShow,
}

impl BookingStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::NoShow => "no_show",
        }
    }

    /// No further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::NoShow)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            "no_show" => Ok(Self::NoShow),
            other => Err(Error::Storage(format!("invalid booking status: {other}"))),
        }
    }
}

/// A reservation.
///
/// Invariant: `credits_refunded <= credits_paid`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id
    pub id: BookingId,
    /// Attached session (meeting)
    pub session_id: SessionId,
    /// Held slot
    pub slot_id: SlotId,
    /// Paying student
    pub student_id: UserId,
    /// Teaching user
    pub teacher_id: UserId,
    /// Current status
    pub status: BookingStatus,
    /// Amount moved into escrow at booking time
    pub credits_paid: Credits,
    /// Amount returned on cancellation
    pub credits_refunded: Credits,
    /// Session start (UTC)
    pub scheduled_at: DateTime<Utc>,
    /// Free-form notes from the student
    pub notes: Option<String>,
    /// Why the booking was cancelled
    pub cancellation_reason: Option<String>,
    /// Which side cancelled
    pub cancelled_by: Option<Role>,
    /// When it was cancelled
    pub cancelled_at: Option<DateTime<Utc>>,
    /// When the session was completed
    pub completed_at: Option<DateTime<Utc>>,
    /// 24-hour reminder delivered
    pub reminder_24h_sent: bool,
    /// 1-hour reminder delivered
    pub reminder_1h_sent: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a confirmed booking.
#[derive(Clone, Debug)]
#[allow(missing_docs)]
pub struct NewBooking {
    pub id: BookingId,
    pub session_id: SessionId,
    pub slot_id: SlotId,
    pub student_id: UserId,
    pub teacher_id: UserId,
    pub price: Credits,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl Booking {
    /// A paid booking. Payment happens in the same unit of work, so bookings
    /// are created directly in `confirmed`.
    #[must_use]
    pub fn confirmed(new: NewBooking, now: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            session_id: new.session_id,
            slot_id: new.slot_id,
            student_id: new.student_id,
            teacher_id: new.teacher_id,
            status: BookingStatus::Confirmed,
            credits_paid: new.price,
            credits_refunded: Credits::ZERO,
            scheduled_at: new.scheduled_at,
            notes: new.notes,
            cancellation_reason: None,
            cancelled_by: None,
            cancelled_at: None,
            completed_at: None,
            reminder_24h_sent: false,
            reminder_1h_sent: false,
            created_at: now,
        }
    }

    /// Which side of the booking `user` is on, if any.
    #[must_use]
    pub fn role_of(&self, user: UserId) -> Option<Role> {
        if user == self.student_id {
            Some(Role::Student)
        } else if user == self.teacher_id {
            Some(Role::Teacher)
        } else {
            None
        }
    }

    /// Resolve who is cancelling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Forbidden`] when `user` is neither the student nor the
    /// teacher of this booking.
    pub fn canceller(&self, user: UserId) -> Result<Role> {
        self.role_of(user).ok_or_else(|| {
            Error::Forbidden(format!(
                "user {user} is not a participant of booking {}",
                self.id
            ))
        })
    }

    /// Cancel with the computed refund.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the booking is already cancelled
    /// - [`Error::Validation`] for any other terminal status, or a refund above
    ///   what was paid
    pub fn cancel(
        &mut self,
        by: Role,
        reason: Option<String>,
        refund: Credits,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match self.status {
            BookingStatus::Cancelled => {
                return Err(Error::Conflict(format!(
                    "booking {} is already cancelled",
                    self.id
                )));
            }
            BookingStatus::Completed | BookingStatus::NoShow => {
                return Err(illegal(self.id, self.status, BookingStatus::Cancelled));
            }
            BookingStatus::Pending | BookingStatus::Confirmed => {}
        }
        if refund > self.credits_paid || refund < Credits::ZERO {
            return Err(Error::Validation(format!(
                "refund of {refund} is outside 0..={} paid",
                self.credits_paid
            )));
        }
        self.status = BookingStatus::Cancelled;
        self.credits_refunded = refund;
        self.cancellation_reason = reason;
        self.cancelled_by = Some(by);
        self.cancelled_at = Some(now);
        Ok(())
    }

    /// Mark the session as having taken place. `false` when already completed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a cancelled or no-show booking.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.status {
            BookingStatus::Pending | BookingStatus::Confirmed => {
                self.status = BookingStatus::Completed;
                self.completed_at = Some(now);
                Ok(true)
            }
            BookingStatus::Completed => Ok(false),
            other => Err(illegal(self.id, other, BookingStatus::Completed)),
        }
    }
}

fn illegal(id: BookingId, from: BookingStatus, to: BookingStatus) -> Error {
    Error::Validation(format!("booking {id}: illegal transition {from} -> {to}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn booking(price: i64) -> Booking {
        Booking::confirmed(
            NewBooking {
                id: BookingId::new(),
                session_id: SessionId::new(),
                slot_id: SlotId::new(),
                student_id: UserId::new(),
                teacher_id: UserId::new(),
                price: Credits::new(price),
                scheduled_at: DateTime::<Utc>::UNIX_EPOCH,
                notes: None,
            },
            DateTime::<Utc>::UNIX_EPOCH,
        )
    }

    #[test]
    fn new_booking_is_confirmed_and_unrefunded() {
        let b = booking(100);
        assert_eq!(b.status, BookingStatus::Confirmed);
        assert_eq!(b.credits_paid, Credits::new(100));
        assert_eq!(b.credits_refunded, Credits::ZERO);
        assert!(!b.reminder_24h_sent && !b.reminder_1h_sent);
    }

    #[test]
    fn cancel_twice_conflicts() {
        let mut b = booking(100);
        let now = DateTime::<Utc>::UNIX_EPOCH;
        b.cancel(Role::Student, Some("sick".into()), Credits::new(50), now)
            .unwrap();
        assert_eq!(b.credits_refunded, Credits::new(50));
        assert_eq!(b.cancelled_by, Some(Role::Student));

        let err = b.cancel(Role::Student, None, Credits::ZERO, now).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn refund_cannot_exceed_payment() {
        let mut b = booking(100);
        let err = b
            .cancel(Role::Teacher, None, Credits::new(101), DateTime::<Utc>::UNIX_EPOCH)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(b.status, BookingStatus::Confirmed);
    }

    #[test]
    fn outsiders_cannot_cancel() {
        let b = booking(100);
        assert_eq!(b.canceller(b.student_id).unwrap(), Role::Student);
        assert_eq!(b.canceller(b.teacher_id).unwrap(), Role::Teacher);
        assert!(matches!(b.canceller(UserId::new()), Err(Error::Forbidden(_))));
    }

    #[test]
    fn complete_is_idempotent() {
        let mut b = booking(100);
        let now = DateTime::<Utc>::UNIX_EPOCH;
        assert!(b.complete(now).unwrap());
        assert!(!b.complete(now).unwrap());
        assert_eq!(b.completed_at, Some(now));
    }

    #[test]
    fn cancelled_booking_cannot_complete() {
        let mut b = booking(100);
        let now = DateTime::<Utc>::UNIX_EPOCH;
        b.cancel(Role::Teacher, None, Credits::new(100), now).unwrap();
        assert!(b.complete(now).is_err());
    }

    #[test]
    fn status_parses() {
        assert_eq!("no_show".parse::<BookingStatus>().unwrap(), BookingStatus::NoShow);
        assert!("archived".parse::<BookingStatus>().is_err());
    }
}

//! Teacher-published bookable time windows.
//!
//! A slot is the scarce resource of the system: at most one booking may hold
//! it. The transitions here are pure; exclusivity across concurrent requests
//! comes from the caller holding the slot's row lock (see
//! [`crate::store::Transaction::lock_slot`]) while it calls them.

use crate::error::{Error, Result};
use crate::types::{BookingId, Credits, SlotId, UserId};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookable calendar window.
///
/// Invariant: `is_booked == booking_id.is_some()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot id
    pub id: SlotId,
    /// Publishing teacher
    pub teacher_id: UserId,
    /// Calendar date (UTC)
    pub date: NaiveDate,
    /// Start time of day (UTC)
    pub start_time: NaiveTime,
    /// End time of day (UTC)
    pub end_time: NaiveTime,
    /// Price in credits
    pub price: Credits,
    /// Whether a booking holds the slot
    pub is_booked: bool,
    /// Holding booking
    pub booking_id: Option<BookingId>,
    /// Student of the holding booking
    pub student_id: Option<UserId>,
}

/// Input for publishing a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSlot {
    /// Publishing teacher
    pub teacher_id: UserId,
    /// Calendar date (UTC)
    pub date: NaiveDate,
    /// Start time of day (UTC)
    pub start_time: NaiveTime,
    /// End time of day (UTC)
    pub end_time: NaiveTime,
    /// Price in credits
    pub price: Credits,
}

impl Slot {
    /// Validate and create an unbooked slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the window is empty or the price is
    /// outside `1..=Credits::MAX_AMOUNT`.
    pub fn publish(new: NewSlot) -> Result<Self> {
        if new.end_time <= new.start_time {
            return Err(Error::Validation(format!(
                "slot must end after it starts ({} - {})",
                new.start_time, new.end_time
            )));
        }
        if !new.price.is_positive() {
            return Err(Error::Validation(format!(
                "slot price must be positive, got {}",
                new.price.amount()
            )));
        }
        if !new.price.is_valid_amount() {
            return Err(Error::Validation(format!(
                "slot price {} exceeds the maximum of {}",
                new.price.amount(),
                Credits::MAX_AMOUNT.amount()
            )));
        }
        Ok(Self {
            id: SlotId::new(),
            teacher_id: new.teacher_id,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            price: new.price,
            is_booked: false,
            booking_id: None,
            student_id: None,
        })
    }

    /// UTC instant the slot starts.
    #[must_use]
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    /// Length of the window, if positive.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        let length = self.end_time - self.start_time;
        (length > Duration::zero()).then_some(length)
    }

    /// Attach a booking.
    ///
    /// # Errors
    ///
    /// - [`Error::Conflict`] if the slot is already booked
    /// - [`Error::Validation`] if the slot's start is not in the future
    pub fn mark_booked(
        &mut self,
        student_id: UserId,
        booking_id: BookingId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.is_booked {
            return Err(Error::Conflict(format!("slot {} is unavailable", self.id)));
        }
        if self.starts_at() <= now {
            return Err(Error::Validation(format!(
                "slot {} started at {}",
                self.id,
                self.starts_at()
            )));
        }
        self.is_booked = true;
        self.booking_id = Some(booking_id);
        self.student_id = Some(student_id);
        Ok(())
    }

    /// Detach the holding booking, making the slot bookable again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the slot is not booked.
    pub fn release(&mut self) -> Result<()> {
        if !self.is_booked {
            return Err(Error::Validation(format!("slot {} is not booked", self.id)));
        }
        self.is_booked = false;
        self.booking_id = None;
        self.student_id = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn slot_at(starts_at: DateTime<Utc>, price: i64) -> Slot {
        Slot::publish(NewSlot {
            teacher_id: UserId::new(),
            date: starts_at.date_naive(),
            start_time: starts_at.time(),
            end_time: starts_at.time() + Duration::minutes(45),
            price: Credits::new(price),
        })
        .unwrap()
    }

    fn noon() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-10T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn publish_rejects_empty_window() {
        let err = Slot::publish(NewSlot {
            teacher_id: UserId::new(),
            date: noon().date_naive(),
            start_time: noon().time(),
            end_time: noon().time(),
            price: Credits::new(10),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn publish_rejects_free_slot() {
        let err = Slot::publish(NewSlot {
            teacher_id: UserId::new(),
            date: noon().date_naive(),
            start_time: noon().time(),
            end_time: noon().time() + Duration::hours(1),
            price: Credits::ZERO,
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn publish_rejects_price_above_maximum() {
        let err = Slot::publish(NewSlot {
            teacher_id: UserId::new(),
            date: noon().date_naive(),
            start_time: noon().time(),
            end_time: noon().time() + Duration::hours(1),
            price: Credits::new(i64::MAX / 50),
        })
        .unwrap_err();
        assert!(err.to_string().contains("maximum"));
    }

    #[test]
    fn book_then_release() {
        let mut slot = slot_at(noon(), 100);
        assert_eq!(slot.starts_at(), noon());
        assert_eq!(slot.duration(), Some(Duration::minutes(45)));

        let booking = BookingId::new();
        let student = UserId::new();
        slot.mark_booked(student, booking, noon() - Duration::hours(1)).unwrap();
        assert!(slot.is_booked);
        assert_eq!(slot.booking_id, Some(booking));
        assert_eq!(slot.student_id, Some(student));

        slot.release().unwrap();
        assert!(!slot.is_booked);
        assert_eq!(slot.booking_id, None);
        assert_eq!(slot.student_id, None);
    }

    #[test]
    fn second_booking_conflicts() {
        let mut slot = slot_at(noon(), 100);
        let earlier = noon() - Duration::days(1);
        slot.mark_booked(UserId::new(), BookingId::new(), earlier).unwrap();
        let err = slot
            .mark_booked(UserId::new(), BookingId::new(), earlier)
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn started_slot_cannot_be_booked() {
        let mut slot = slot_at(noon(), 100);
        let err = slot.mark_booked(UserId::new(), BookingId::new(), noon()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!slot.is_booked);
    }

    #[test]
    fn releasing_free_slot_fails() {
        let mut slot = slot_at(noon(), 100);
        assert!(matches!(slot.release(), Err(Error::Validation(_))));
    }
}

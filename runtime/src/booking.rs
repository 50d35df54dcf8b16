//! Booking creation and reads.

use crate::finish;
use crate::ledger::Ledger;
use crate::metrics;
use crate::notify::Dispatcher;
use crate::slots::SlotRegistry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tutoring_core::{
    Account, Booking, BookingId, Clock, Credits, Error, NewBooking, Notification, Result, Role,
    Session, SessionId, SlotId, Store, TransactionId, UserId,
};

/// Outcome of a successful booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BookingReceipt {
    /// The confirmed booking
    pub booking: Booking,
    /// The scheduled session attached to it
    pub session: Session,
    /// Ledger transaction that moved the price into escrow
    pub transaction_id: TransactionId,
    /// Student balance after the debit
    pub balance_after: Credits,
}

/// Creates and reads bookings.
#[derive(Clone)]
pub struct BookingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    dispatcher: Dispatcher,
    default_session_minutes: i64,
}

impl BookingService {
    /// Creates a booking service.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        ledger: Ledger,
        dispatcher: Dispatcher,
        default_session_minutes: i64,
    ) -> Self {
        Self {
            store,
            clock,
            ledger,
            dispatcher,
            default_session_minutes,
        }
    }

    /// Book a slot for a student.
    ///
    /// One transaction: lock the slot, check funds, create the session and
    /// the booking, mark the slot booked and move the price into escrow.
    /// Any failure leaves every entity as it was.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the slot or student does not exist
    /// - [`Error::Conflict`] if the slot is already booked
    /// - [`Error::InsufficientFunds`] if the balance is below the price
    /// - [`Error::Validation`] if the slot already started or the student is
    ///   the slot's teacher
    #[tracing::instrument(skip(self, notes), fields(booking_id = tracing::field::Empty))]
    pub async fn create(
        &self,
        student_id: UserId,
        slot_id: SlotId,
        notes: Option<String>,
    ) -> Result<BookingReceipt> {
        let started = Instant::now();
        let result = self.create_inner(student_id, slot_id, notes).await;

        match &result {
            Ok(receipt) => {
                tracing::Span::current()
                    .record("booking_id", tracing::field::display(receipt.booking.id));
                tracing::info!(
                    session_id = %receipt.session.id,
                    price = receipt.booking.credits_paid.amount(),
                    balance_after = receipt.balance_after.amount(),
                    "Booking created"
                );
                metrics::record_booking_created(started.elapsed());
                self.notify_created(&receipt.booking);
            }
            Err(error) => {
                tracing::info!(%error, "Booking rejected");
                metrics::record_booking_rejected(error);
            }
        }
        result
    }

    async fn create_inner(
        &self,
        student_id: UserId,
        slot_id: SlotId,
        notes: Option<String>,
    ) -> Result<BookingReceipt> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let result = async {
            // 1. lock before looking at availability
            let mut slot = SlotRegistry::lock_and_load(tx.as_mut(), slot_id).await?;
            if slot.is_booked {
                return Err(Error::Conflict(format!("slot {slot_id} is unavailable")));
            }
            if slot.teacher_id == student_id {
                return Err(Error::Validation(
                    "a teacher cannot book their own slot".to_string(),
                ));
            }

            // 2. funds, before anything is written
            let available = tx.load_user(student_id).await?.credit_balance;
            if available < slot.price {
                return Err(Error::InsufficientFunds {
                    required: slot.price,
                    available,
                });
            }

            // 3. session
            let duration = slot
                .duration()
                .map(|d| d.num_minutes())
                .filter(|minutes| *minutes > 0)
                .unwrap_or(self.default_session_minutes);
            let session = Session::scheduled(slot.starts_at(), duration);
            tx.insert_session(&session).await?;

            // 4. booking
            let booking = Booking::confirmed(
                NewBooking {
                    id: BookingId::new(),
                    session_id: session.id,
                    slot_id,
                    student_id,
                    teacher_id: slot.teacher_id,
                    price: slot.price,
                    scheduled_at: session.scheduled_at,
                    notes,
                },
                now,
            );
            tx.insert_booking(&booking).await?;

            // 5. slot
            slot.mark_booked(student_id, booking.id, now)?;
            tx.update_slot(&slot).await?;

            // 6. escrow
            let reference = booking.id.to_string();
            let posting = self
                .ledger
                .deduct_in(
                    tx.as_mut(),
                    student_id,
                    slot.price,
                    &format!("Booking {reference}"),
                    Some(&reference),
                )
                .await?;

            Ok(BookingReceipt {
                balance_after: posting
                    .balance_of(&Account::User(student_id))
                    .unwrap_or_default(),
                transaction_id: posting.transaction.id,
                booking,
                session,
            })
        }
        .await;

        finish(tx, result).await
    }

    fn notify_created(&self, booking: &Booking) {
        let data = serde_json::json!({
            "booking_id": booking.id,
            "session_id": booking.session_id,
            "scheduled_at": booking.scheduled_at,
        });
        self.dispatcher.dispatch(
            Notification::new(
                booking.teacher_id,
                "New booking",
                format!("A student booked your slot at {}", booking.scheduled_at),
            )
            .with_data(data.clone()),
        );
        self.dispatcher.dispatch(
            Notification::new(
                booking.student_id,
                "Booking confirmed",
                format!(
                    "Your session at {} is booked for {}",
                    booking.scheduled_at, booking.credits_paid
                ),
            )
            .with_data(data),
        );
    }

    /// Read a booking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn get(&self, booking_id: BookingId) -> Result<Booking> {
        let mut tx = self.store.begin().await?;
        let result = tx.load_booking(booking_id).await;
        finish(tx, result).await
    }

    /// Read a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if it does not exist.
    pub async fn session(&self, session_id: SessionId) -> Result<Session> {
        let mut tx = self.store.begin().await?;
        let result = tx.load_session(session_id).await;
        finish(tx, result).await
    }

    /// Bookings where `user` is the student or the teacher, newest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list_for_user(&self, user: UserId, role: Role) -> Result<Vec<Booking>> {
        let mut tx = self.store.begin().await?;
        let result = tx.bookings_for_user(user, role).await;
        finish(tx, result).await
    }
}

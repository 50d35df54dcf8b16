//! Cancellation and refund orchestration.

use crate::finish;
use crate::ledger::Ledger;
use crate::metrics;
use crate::notify::Dispatcher;
use crate::slots::SlotRegistry;
use serde::Serialize;
use std::sync::Arc;
use tutoring_core::{
    Booking, BookingId, BookingStatus, Clock, Credits, Error, Notification, RefundPolicy, Result,
    Role, SessionId, Store, TransactionId, UserId,
};

/// What a cancellation returned to the student.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RefundResult {
    /// Cancelled booking
    pub booking_id: BookingId,
    /// Which side cancelled
    pub cancelled_by: Role,
    /// Percent of `credits_paid` refunded
    pub percent: u8,
    /// Credits returned
    pub amount: Credits,
    /// What was originally paid
    pub credits_paid: Credits,
    /// Notice given, in hours
    pub hours_until_session: f64,
    /// Ledger transaction of the refund; `None` when nothing was refunded
    pub transaction_id: Option<TransactionId>,
}

/// Outcome of [`RefundEngine::refund_all_bookings`].
#[derive(Debug, Default)]
pub struct BatchRefundSummary {
    /// Bookings refunded
    pub refunded: Vec<RefundResult>,
    /// Bookings whose refund failed, with the reason
    pub failed: Vec<(BookingId, Error)>,
}

/// Cancels bookings and returns money from escrow.
#[derive(Clone)]
pub struct RefundEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    dispatcher: Dispatcher,
    policy: RefundPolicy,
}

impl RefundEngine {
    /// Creates a refund engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        ledger: Ledger,
        dispatcher: Dispatcher,
        policy: RefundPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            ledger,
            dispatcher,
            policy,
        }
    }

    /// Cancel a booking on behalf of its student or teacher.
    ///
    /// In one transaction: refund from escrow, mark the booking cancelled,
    /// release the slot and cancel the session. Participants are notified
    /// after the commit.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the booking does not exist
    /// - [`Error::Forbidden`] if `cancelled_by` is not a participant
    /// - [`Error::Conflict`] if the booking is already cancelled
    /// - [`Error::Validation`] if the booking is completed or marked no-show
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        cancelled_by: UserId,
        reason: Option<String>,
    ) -> Result<RefundResult> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let result = async {
            let mut booking = tx.lock_booking(booking_id).await?;
            let role = booking.canceller(cancelled_by)?;
            if booking.status == BookingStatus::Cancelled {
                return Err(Error::Conflict(format!(
                    "booking {booking_id} is already cancelled"
                )));
            }

            let quote = self.policy.quote(role, booking.credits_paid, booking.scheduled_at, now);
            let mut slot = SlotRegistry::lock_and_load(tx.as_mut(), booking.slot_id).await?;

            let transaction_id = if quote.amount.is_positive() {
                let reference = booking_id.to_string();
                let posting = self
                    .ledger
                    .refund_in(
                        tx.as_mut(),
                        booking.student_id,
                        quote.amount,
                        &format!("Refund for booking {reference} ({}%)", quote.percent),
                        &reference,
                    )
                    .await?;
                Some(posting.transaction.id)
            } else {
                None
            };

            booking.cancel(role, reason, quote.amount, now)?;
            tx.update_booking(&booking).await?;

            slot.release()?;
            tx.update_slot(&slot).await?;

            let session = tx.load_session(booking.session_id).await?;
            if let Some(cancelled) = session.cancel()? {
                if !tx.transition_session(session.status, &cancelled).await? {
                    return Err(Error::Conflict(format!(
                        "session {} changed while cancelling",
                        session.id
                    )));
                }
            }

            let refund = RefundResult {
                booking_id,
                cancelled_by: role,
                percent: quote.percent,
                amount: quote.amount,
                credits_paid: booking.credits_paid,
                hours_until_session: quote.hours_until_session,
                transaction_id,
            };
            Ok((booking, refund))
        }
        .await;

        let (booking, refund) = finish(tx, result).await?;

        tracing::info!(
            %booking_id,
            cancelled_by = refund.cancelled_by.as_str(),
            percent = refund.percent,
            amount = refund.amount.amount(),
            "Booking cancelled"
        );
        metrics::record_refund(refund.percent, refund.amount.amount());
        self.notify_cancelled(&booking, &refund);
        Ok(refund)
    }

    /// Cancel every confirmed booking of a session on the teacher's behalf.
    ///
    /// Each refund is its own transaction. Failures are logged and collected;
    /// they never abort the rest of the batch.
    ///
    /// # Errors
    ///
    /// Only if the session's bookings cannot be listed at all.
    #[tracing::instrument(skip(self, reason))]
    pub async fn refund_all_bookings(
        &self,
        session_id: SessionId,
        teacher_id: UserId,
        reason: Option<String>,
    ) -> Result<BatchRefundSummary> {
        let mut tx = self.store.begin().await?;
        let listed = tx.bookings_for_session(session_id).await;
        let bookings = finish(tx, listed).await?;

        let mut summary = BatchRefundSummary::default();
        for booking in bookings
            .into_iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
        {
            match self.cancel(booking.id, teacher_id, reason.clone()).await {
                Ok(refund) => summary.refunded.push(refund),
                Err(error) => {
                    tracing::warn!(booking_id = %booking.id, %error, "Batch refund failed");
                    summary.failed.push((booking.id, error));
                }
            }
        }

        tracing::info!(
            %session_id,
            refunded = summary.refunded.len(),
            failed = summary.failed.len(),
            "Batch refund finished"
        );
        Ok(summary)
    }

    fn notify_cancelled(&self, booking: &Booking, refund: &RefundResult) {
        let data = serde_json::json!({
            "booking_id": booking.id,
            "refund_amount": refund.amount,
            "refund_percent": refund.percent,
            "cancelled_by": refund.cancelled_by,
        });
        self.dispatcher.dispatch(
            Notification::new(
                booking.student_id,
                "Booking cancelled",
                format!(
                    "Your session at {} was cancelled. Refund: {} ({}%)",
                    booking.scheduled_at, refund.amount, refund.percent
                ),
            )
            .with_data(data.clone()),
        );
        if refund.cancelled_by == Role::Student {
            self.dispatcher.dispatch(
                Notification::new(
                    booking.teacher_id,
                    "Booking cancelled",
                    format!("The student cancelled the session at {}", booking.scheduled_at),
                )
                .with_data(data),
            );
        }
    }
}

//! Booking creation, reads and cancellation.

use crate::{
    AppError, WebResult,
    extractors::{CallerIdentity, CorrelationId},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use tutoring_core::{Booking, BookingId, SlotId};
use tutoring_runtime::{BookingReceipt, RefundResult};

/// Body of `POST /bookings`.
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Slot to reserve
    pub slot_id: SlotId,
    /// Free-text notes for the teacher
    #[serde(default)]
    pub notes: Option<String>,
}

/// Body of `POST /bookings/:id/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelBookingRequest {
    /// Why the booking is cancelled
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /bookings`: the caller books a slot as the student.
///
/// The price is taken into escrow in the same transaction that reserves the
/// slot. 409 means the slot is gone, 402 means the caller cannot pay.
pub async fn create_booking(
    State(state): State<AppState>,
    caller: CallerIdentity,
    correlation_id: CorrelationId,
    Json(request): Json<CreateBookingRequest>,
) -> WebResult<(StatusCode, Json<BookingReceipt>)> {
    tracing::debug!(
        correlation_id = %correlation_id.0,
        student_id = %caller.id(),
        slot_id = %request.slot_id,
        "Booking requested"
    );

    let receipt = state
        .services
        .bookings
        .create(caller.id(), request.slot_id, request.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// `GET /bookings/:id`: only the booking's student or teacher may read it.
pub async fn get_booking(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(booking_id): Path<BookingId>,
) -> WebResult<Json<Booking>> {
    let booking = state.services.bookings.get(booking_id).await?;
    if booking.role_of(caller.id()).is_none() {
        return Err(AppError::forbidden("not a participant of this booking"));
    }
    Ok(Json(booking))
}

/// `POST /bookings/:id/cancel`
///
/// Returns the refund so the client can show amount and percentage without a
/// second request.
pub async fn cancel_booking(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(booking_id): Path<BookingId>,
    request: Option<Json<CancelBookingRequest>>,
) -> WebResult<Json<RefundResult>> {
    let Json(request) = request.unwrap_or_default();
    let refund = state
        .services
        .refunds
        .cancel(booking_id, caller.id(), request.reason)
        .await?;
    Ok(Json(refund))
}

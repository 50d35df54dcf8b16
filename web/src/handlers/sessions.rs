//! Session reads, operator lifecycle overrides and teacher-initiated batch
//! refunds.

use crate::{WebResult, extractors::CallerIdentity, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tutoring_core::{BookingId, Session, SessionId};
use tutoring_runtime::{RefundResult, Transition};

/// `GET /sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> WebResult<Json<Session>> {
    Ok(Json(state.services.bookings.session(session_id).await?))
}

/// `POST /sessions/:id/open`: operator override; no-op when already live.
pub async fn open_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> WebResult<Json<Transition>> {
    let transition = state.services.scheduler.force_open(session_id).await?;
    tracing::info!(
        session_id = %session_id,
        applied = transition.is_applied(),
        "Manual open"
    );
    Ok(Json(transition))
}

/// `POST /sessions/:id/close`: operator override; no-op when already ended.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> WebResult<Json<Transition>> {
    let transition = state.services.scheduler.force_close(session_id).await?;
    tracing::info!(
        session_id = %session_id,
        applied = transition.is_applied(),
        "Manual close"
    );
    Ok(Json(transition))
}

/// Body of `POST /sessions/:id/refund-all`.
#[derive(Debug, Default, Deserialize)]
pub struct RefundAllRequest {
    /// Reason recorded on every cancelled booking
    #[serde(default)]
    pub reason: Option<String>,
}

/// A booking the batch could not refund.
#[derive(Debug, Serialize)]
pub struct RefundFailure {
    /// Booking left untouched
    pub booking_id: BookingId,
    /// Error code
    pub code: &'static str,
    /// Error message
    pub message: String,
}

/// Response of `POST /sessions/:id/refund-all`.
#[derive(Debug, Serialize)]
pub struct RefundAllResponse {
    /// Bookings refunded in full
    pub refunded: Vec<RefundResult>,
    /// Bookings that failed individually
    pub failed: Vec<RefundFailure>,
}

/// `POST /sessions/:id/refund-all`: the teacher cancels every confirmed
/// booking of a session. Each booking is refunded independently.
pub async fn refund_all(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(session_id): Path<SessionId>,
    request: Option<Json<RefundAllRequest>>,
) -> WebResult<Json<RefundAllResponse>> {
    let Json(request) = request.unwrap_or_default();
    let summary = state
        .services
        .refunds
        .refund_all_bookings(session_id, caller.id(), request.reason)
        .await?;

    Ok(Json(RefundAllResponse {
        refunded: summary.refunded,
        failed: summary
            .failed
            .into_iter()
            .map(|(booking_id, error)| RefundFailure {
                booking_id,
                code: error.code(),
                message: error.to_string(),
            })
            .collect(),
    }))
}

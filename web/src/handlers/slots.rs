//! Slot publication.

use crate::{WebResult, extractors::CallerIdentity, state::AppState};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tutoring_core::{Credits, NewSlot, Slot, SlotId};

/// Body of `POST /slots`.
#[derive(Debug, Deserialize)]
pub struct PublishSlotRequest {
    /// Calendar date (UTC)
    pub date: NaiveDate,
    /// Start time of day (UTC)
    pub start_time: NaiveTime,
    /// End time of day (UTC)
    pub end_time: NaiveTime,
    /// Price in credits
    pub price: Credits,
}

/// `POST /slots`: publish a slot owned by the calling teacher.
pub async fn publish_slot(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(request): Json<PublishSlotRequest>,
) -> WebResult<(StatusCode, Json<Slot>)> {
    let new = NewSlot {
        teacher_id: caller.id(),
        date: request.date,
        start_time: request.start_time,
        end_time: request.end_time,
        price: request.price,
    };
    let slot = state.services.slots.publish(caller.0, new).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

/// `GET /slots/:id`
pub async fn get_slot(
    State(state): State<AppState>,
    Path(slot_id): Path<SlotId>,
) -> WebResult<Json<Slot>> {
    Ok(Json(state.services.slots.get(slot_id).await?))
}

/// `DELETE /slots/:id`: withdraw an unbooked slot.
pub async fn withdraw_slot(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(slot_id): Path<SlotId>,
) -> WebResult<StatusCode> {
    state.services.slots.withdraw(caller.0, slot_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

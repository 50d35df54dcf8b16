//! Per-user reads and credit top-ups.

use crate::{AppError, WebResult, extractors::CallerIdentity, state::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tutoring_core::{Account, Booking, Credits, Role, TransactionId, UserId};

/// Query of `GET /users/:id/bookings`.
#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    /// Which side of the bookings to list
    pub role: Role,
}

/// `GET /users/:id/bookings?role=student|teacher`, newest first.
///
/// Callers can only list their own bookings.
pub async fn list_bookings(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<UserId>,
    Query(query): Query<ListBookingsQuery>,
) -> WebResult<Json<Vec<Booking>>> {
    if caller.id() != user_id {
        return Err(AppError::forbidden("cannot list another user's bookings"));
    }
    let bookings = state
        .services
        .bookings
        .list_for_user(user_id, query.role)
        .await?;
    Ok(Json(bookings))
}

/// Body of `POST /users/:id/credits`.
#[derive(Debug, Deserialize)]
pub struct AddCreditsRequest {
    /// Credits to issue
    pub amount: Credits,
    /// Ledger description
    #[serde(default)]
    pub description: Option<String>,
    /// External reference (payment id)
    #[serde(default)]
    pub reference: Option<String>,
}

/// Balance after a ledger movement.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// User
    pub user_id: UserId,
    /// Posting that changed the balance, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    /// Current balance
    pub balance: Credits,
}

/// `POST /users/:id/credits`: operator top-up, issued by the platform.
pub async fn add_credits(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Json(request): Json<AddCreditsRequest>,
) -> WebResult<(StatusCode, Json<BalanceResponse>)> {
    let description = request.description.as_deref().unwrap_or("Credit top-up");
    let posting = state
        .services
        .ledger
        .add_credits(
            user_id,
            request.amount,
            description,
            request.reference.as_deref(),
        )
        .await?;

    let balance = posting
        .balance_of(&Account::User(user_id))
        .ok_or_else(|| AppError::internal("posting did not touch the user account"))?;
    Ok((
        StatusCode::CREATED,
        Json(BalanceResponse {
            user_id,
            transaction_id: Some(posting.transaction.id),
            balance,
        }),
    ))
}

/// `GET /users/:id/balance`: the caller's own ledger balance.
pub async fn get_balance(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(user_id): Path<UserId>,
) -> WebResult<Json<BalanceResponse>> {
    if caller.id() != user_id {
        return Err(AppError::forbidden("cannot read another user's balance"));
    }
    let balance = state
        .services
        .ledger
        .get_balance(&Account::User(user_id))
        .await?;
    Ok(Json(BalanceResponse {
        user_id,
        transaction_id: None,
        balance,
    }))
}

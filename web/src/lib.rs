//! HTTP surface for the tutoring booking core.
//!
//! Thin axum handlers over [`tutoring_runtime::Services`]: every handler
//! extracts its input, calls one service operation and maps the outcome.
//! Domain errors become HTTP errors through [`AppError`].
//!
//! # Routes
//!
//! | method | path | operation |
//! |--------|------|-----------|
//! | `GET` | `/health` | liveness |
//! | `GET` | `/health/ready` | store readiness |
//! | `POST` | `/slots` | publish a slot |
//! | `GET` / `DELETE` | `/slots/:id` | read / withdraw a slot |
//! | `POST` | `/bookings` | book a slot |
//! | `GET` | `/bookings/:id` | read a booking |
//! | `POST` | `/bookings/:id/cancel` | cancel with refund |
//! | `GET` | `/users/:id/bookings?role=` | list a user's bookings |
//! | `GET` | `/users/:id/balance` | ledger balance |
//! | `POST` | `/users/:id/credits` | operator top-up |
//! | `GET` | `/sessions/:id` | read a session |
//! | `POST` | `/sessions/:id/open` | force-open |
//! | `POST` | `/sessions/:id/close` | force-close |
//! | `POST` | `/sessions/:id/refund-all` | teacher cancels the whole session |
//!
//! The caller is identified by the `X-User-Id` and `X-User-Role` headers set
//! by the authenticating proxy.

#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use config::Config;
pub use error::AppError;
pub use extractors::{CallerIdentity, CorrelationId, USER_ID_HEADER, USER_ROLE_HEADER};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{bookings, sessions, slots, users};
use tower_http::trace::TraceLayer;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the complete router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .route("/slots", post(slots::publish_slot))
        .route(
            "/slots/:id",
            get(slots::get_slot).delete(slots::withdraw_slot),
        )
        .route("/bookings", post(bookings::create_booking))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/users/:id/bookings", get(users::list_bookings))
        .route("/users/:id/balance", get(users::get_balance))
        .route("/users/:id/credits", post(users::add_credits))
        .route("/sessions/:id", get(sessions::get_session))
        .route("/sessions/:id/open", post(sessions::open_session))
        .route("/sessions/:id/close", post(sessions::close_session))
        .route("/sessions/:id/refund-all", post(sessions::refund_all))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}

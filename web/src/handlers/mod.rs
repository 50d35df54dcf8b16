//! HTTP request handlers, one module per resource.

pub mod bookings;
pub mod health;
pub mod sessions;
pub mod slots;
pub mod users;

pub use health::{health_check, readiness_check};

//! Application state shared across handlers.

use tutoring_runtime::Services;

/// State handed to every handler.
///
/// Cloning is cheap: the services hold their store and collaborators behind
/// `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Booking core services
    pub services: Services,
}

impl AppState {
    /// Wrap the services.
    #[must_use]
    pub const fn new(services: Services) -> Self {
        Self { services }
    }
}

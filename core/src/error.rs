//! Error taxonomy surfaced by every booking, refund and ledger operation.

use crate::types::Credits;
use thiserror::Error;

/// Errors returned synchronously to the caller of a core operation.
///
/// Notification failures are deliberately absent: they are logged by the
/// dispatcher and never abort money movement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Slot, booking, session or user does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The resource is in a state that conflicts with the request
    /// (slot already booked, booking already cancelled).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The payer's balance is below the amount to debit.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount the operation needed
        required: Credits,
        /// Balance at the time of the check
        available: Credits,
    },

    /// Input or state-transition validation failed
    /// (unbalanced ledger entries, non-positive amounts, illegal transitions).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The caller is not a party to the resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Persistence backend failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code, used for logs and metrics labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::Validation(_) => "validation",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage",
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

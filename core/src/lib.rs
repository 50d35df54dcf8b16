//! # Tutoring Core
//!
//! Domain types and rules for the tutoring-session booking core.
//!
//! This crate is pure: it holds the data model, the double-entry ledger
//! model, the refund policy and the slot, booking and session state
//! machines. Executing them against storage is the job of
//! `tutoring-runtime`, which talks to persistence only through the
//! [`store::Store`] and [`store::Transaction`] traits defined here.
//!
//! ## Modules
//!
//! - [`types`]: identifiers, [`Credits`], roles and the cached-balance [`User`]
//! - [`account`]: tagged ledger accounts and their sign conventions
//! - [`ledger`]: posting requests, transactions, entries, replay
//! - [`slot`]: bookable windows and the exclusivity transitions
//! - [`booking`]: the reservation aggregate
//! - [`session`]: the SCHEDULED → LIVE → ENDED lifecycle
//! - [`refund`]: the cancellation refund policy
//! - [`environment`]: injected clock and notifier
//! - [`store`]: the transactional persistence seam

pub mod account;
pub mod booking;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod refund;
pub mod session;
pub mod slot;
pub mod store;
pub mod types;

pub use account::{Account, EntryType};
pub use booking::{Booking, BookingStatus, NewBooking};
pub use environment::{Clock, Notification, Notifier, NotifyError, SystemClock};
pub use error::{Error, Result};
pub use ledger::{
    EntrySpec, LedgerEntry, LedgerTransaction, Posting, PostingRequest, TransactionType,
};
pub use refund::{RefundPolicy, RefundQuote};
pub use session::{Session, SessionStatus, Trigger};
pub use slot::{NewSlot, Slot};
pub use store::{Store, Transaction};
pub use types::{
    BookingId, Caller, Credits, EntryId, Role, SessionId, SlotId, TransactionGroupId,
    TransactionId, User, UserId,
};

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

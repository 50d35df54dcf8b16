//! Persistence seam.
//!
//! Every service operation runs inside exactly one [`Transaction`]: either all
//! of its writes become visible at [`Transaction::commit`] or none do.
//! Dropping a transaction without committing rolls it back.
//!
//! Locking contract implementations must honour:
//!
//! - [`Transaction::lock_slot`] takes a row-exclusive lock held until the
//!   transaction ends, so concurrent bookings of one slot serialize.
//! - [`Transaction::lock_balance`] serializes writers of one ledger account.
//!   Callers acquire account locks in [`crate::ledger::PostingRequest::accounts`]
//!   order.
//! - [`Transaction::transition_session`] is a compare-and-set on the current
//!   status and reports whether it applied.

use crate::account::Account;
use crate::booking::Booking;
use crate::error::Result;
use crate::ledger::{LedgerEntry, Posting};
use crate::session::{Session, SessionStatus};
use crate::slot::Slot;
use crate::types::{BookingId, Credits, Role, SessionId, SlotId, TransactionId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Factory for transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Start a new unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the backend is unavailable.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// One atomic unit of work.
///
/// Loads return [`crate::Error::NotFound`] for missing rows; every other
/// backend failure surfaces as [`crate::Error::Storage`].
#[async_trait]
pub trait Transaction: Send {
    // ---- users -----------------------------------------------------------

    /// Insert a user.
    async fn insert_user(&mut self, user: &User) -> Result<()>;

    /// Load a user without locking.
    async fn load_user(&mut self, id: UserId) -> Result<User>;

    /// Overwrite the cached balance with the latest ledger `balance_after`.
    async fn set_cached_balance(&mut self, id: UserId, balance: Credits) -> Result<()>;

    // ---- slots -----------------------------------------------------------

    /// Insert a slot.
    async fn insert_slot(&mut self, slot: &Slot) -> Result<()>;

    /// Load a slot without locking.
    async fn load_slot(&mut self, id: SlotId) -> Result<Slot>;

    /// Lock a slot row exclusively, then load it.
    async fn lock_slot(&mut self, id: SlotId) -> Result<Slot>;

    /// Persist booking state of a locked slot.
    async fn update_slot(&mut self, slot: &Slot) -> Result<()>;

    /// Delete a slot.
    async fn delete_slot(&mut self, id: SlotId) -> Result<()>;

    // ---- sessions --------------------------------------------------------

    /// Insert a session.
    async fn insert_session(&mut self, session: &Session) -> Result<()>;

    /// Load a session.
    async fn load_session(&mut self, id: SessionId) -> Result<Session>;

    /// Write `next` only if the stored status still equals `expected`.
    /// Returns `true` when exactly one row changed.
    async fn transition_session(&mut self, expected: SessionStatus, next: &Session)
    -> Result<bool>;

    /// SCHEDULED sessions whose start lies in `[from, to]`.
    async fn sessions_due_to_open(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>>;

    /// SCHEDULED or LIVE sessions whose end (start + duration) is at or before `cutoff`.
    async fn sessions_due_to_close(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Session>>;

    // ---- bookings --------------------------------------------------------

    /// Insert a booking. Fails with [`crate::Error::Conflict`] if the slot
    /// already has one.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Load a booking without locking.
    async fn load_booking(&mut self, id: BookingId) -> Result<Booking>;

    /// Lock a booking row exclusively, then load it.
    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking>;

    /// Persist a booking's mutable fields.
    async fn update_booking(&mut self, booking: &Booking) -> Result<()>;

    /// Bookings where `user` plays `role`, newest `scheduled_at` first.
    async fn bookings_for_user(&mut self, user: UserId, role: Role) -> Result<Vec<Booking>>;

    /// Bookings attached to a session.
    async fn bookings_for_session(&mut self, session: SessionId) -> Result<Vec<Booking>>;

    // ---- ledger ----------------------------------------------------------

    /// Serialize writers of `account` and return its current signed balance.
    async fn lock_balance(&mut self, account: &Account) -> Result<Credits>;

    /// Current signed balance without locking: the cached balance for users,
    /// the most recent `balance_after` for system accounts.
    async fn balance(&mut self, account: &Account) -> Result<Credits>;

    /// Append a transaction and its entries.
    async fn insert_posting(&mut self, posting: &Posting) -> Result<()>;

    /// Load a transaction with its entries.
    async fn load_posting(&mut self, id: TransactionId) -> Result<Posting>;

    /// Every entry of `account`, in creation order.
    async fn entries_for(&mut self, account: &Account) -> Result<Vec<LedgerEntry>>;

    // ---- completion ------------------------------------------------------

    /// Make every write of this transaction visible.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

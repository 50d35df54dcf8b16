//! In-memory [`Store`].
//!
//! One transaction runs at a time: `begin` takes an owned lock on the whole
//! state and works on a copy of it. `commit` writes the copy back; dropping or
//! rolling back discards it. That is stricter than row locking, and it gives
//! tests the same visible outcome for concurrent callers: serialized,
//! all-or-nothing units of work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tutoring_core::{
    Account, Booking, BookingId, BookingStatus, Credits, Error, LedgerEntry, LedgerTransaction,
    Posting, Result, Role, Session, SessionId, SessionStatus, Slot, SlotId, Store, Transaction,
    TransactionId, User, UserId,
};

#[derive(Clone, Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    slots: HashMap<SlotId, Slot>,
    sessions: HashMap<SessionId, Session>,
    bookings: HashMap<BookingId, Booking>,
    transactions: HashMap<TransactionId, LedgerTransaction>,
    entries: Vec<LedgerEntry>,
}

impl State {
    fn latest_balance(&self, account: &Account) -> Credits {
        self.entries
            .iter()
            .rev()
            .find(|e| &e.account == account)
            .map(|e| e.balance_after)
            .unwrap_or_default()
    }
}

/// Store backed by process memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed copy of a user.
    pub async fn user(&self, id: UserId) -> Option<User> {
        self.state.lock().await.users.get(&id).cloned()
    }

    /// Committed copy of a slot.
    pub async fn slot(&self, id: SlotId) -> Option<Slot> {
        self.state.lock().await.slots.get(&id).cloned()
    }

    /// Committed copy of a session.
    pub async fn session(&self, id: SessionId) -> Option<Session> {
        self.state.lock().await.sessions.get(&id).cloned()
    }

    /// Number of committed bookings.
    pub async fn booking_count(&self) -> usize {
        self.state.lock().await.bookings.len()
    }

    /// Number of committed sessions.
    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Every committed ledger entry, in creation order.
    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Number of committed ledger transactions.
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    /// Overwrite a user's cached balance behind the ledger's back, to
    /// simulate drift.
    pub async fn corrupt_cached_balance(&self, id: UserId, balance: Credits) {
        if let Some(user) = self.state.lock().await.users.get_mut(&id) {
            user.credit_balance = balance;
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction { guard, working }))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
}

fn sorted_by_start(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by_key(|s| s.scheduled_at);
    sessions
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_user(&mut self, user: &User) -> Result<()> {
        if self.working.users.contains_key(&user.id) {
            return Err(Error::Conflict(format!("user {} already exists", user.id)));
        }
        self.working.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn load_user(&mut self, id: UserId) -> Result<User> {
        self.working
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("user", id))
    }

    async fn set_cached_balance(&mut self, id: UserId, balance: Credits) -> Result<()> {
        let user = self
            .working
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("user", id))?;
        user.credit_balance = balance;
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<()> {
        self.working.slots.insert(slot.id, slot.clone());
        Ok(())
    }

    async fn load_slot(&mut self, id: SlotId) -> Result<Slot> {
        self.working
            .slots
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("slot", id))
    }

    async fn lock_slot(&mut self, id: SlotId) -> Result<Slot> {
        self.load_slot(id).await
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<()> {
        let stored = self
            .working
            .slots
            .get_mut(&slot.id)
            .ok_or_else(|| Error::not_found("slot", slot.id))?;
        *stored = slot.clone();
        Ok(())
    }

    async fn delete_slot(&mut self, id: SlotId) -> Result<()> {
        self.working
            .slots
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("slot", id))
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        self.working.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&mut self, id: SessionId) -> Result<Session> {
        self.working
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("session", id))
    }

    async fn transition_session(
        &mut self,
        expected: SessionStatus,
        next: &Session,
    ) -> Result<bool> {
        match self.working.sessions.get_mut(&next.id) {
            Some(stored) if stored.status == expected => {
                *stored = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::not_found("session", next.id)),
        }
    }

    async fn sessions_due_to_open(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        Ok(sorted_by_start(
            self.working
                .sessions
                .values()
                .filter(|s| s.status == SessionStatus::Scheduled)
                .filter(|s| s.scheduled_at >= from && s.scheduled_at <= to)
                .cloned()
                .collect(),
        ))
    }

    async fn sessions_due_to_close(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        Ok(sorted_by_start(
            self.working
                .sessions
                .values()
                .filter(|s| matches!(s.status, SessionStatus::Scheduled | SessionStatus::Live))
                .filter(|s| s.ends_at() <= cutoff)
                .cloned()
                .collect(),
        ))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let held = self.working.bookings.values().any(|b| {
            b.slot_id == booking.slot_id && b.status != BookingStatus::Cancelled
        });
        if held {
            return Err(Error::Conflict(format!(
                "slot {} already has a booking",
                booking.slot_id
            )));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn load_booking(&mut self, id: BookingId) -> Result<Booking> {
        self.working
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("booking", id))
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking> {
        self.load_booking(id).await
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let stored = self
            .working
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| Error::not_found("booking", booking.id))?;
        *stored = booking.clone();
        Ok(())
    }

    async fn bookings_for_user(&mut self, user: UserId, role: Role) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| match role {
                Role::Student => b.student_id == user,
                Role::Teacher => b.teacher_id == user,
            })
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(bookings)
    }

    async fn bookings_for_session(&mut self, session: SessionId) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .working
            .bookings
            .values()
            .filter(|b| b.session_id == session)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn lock_balance(&mut self, account: &Account) -> Result<Credits> {
        self.balance(account).await
    }

    async fn balance(&mut self, account: &Account) -> Result<Credits> {
        match account.user_id() {
            Some(id) => Ok(self.load_user(id).await?.credit_balance),
            None => Ok(self.working.latest_balance(account)),
        }
    }

    async fn insert_posting(&mut self, posting: &Posting) -> Result<()> {
        self.working
            .transactions
            .insert(posting.transaction.id, posting.transaction.clone());
        self.working.entries.extend(posting.entries.iter().cloned());
        Ok(())
    }

    async fn load_posting(&mut self, id: TransactionId) -> Result<Posting> {
        let transaction = self
            .working
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("transaction", id))?;
        let entries = self
            .working
            .entries
            .iter()
            .filter(|e| e.transaction_id == id)
            .cloned()
            .collect();
        Ok(Posting {
            transaction,
            entries,
        })
    }

    async fn entries_for(&mut self, account: &Account) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .working
            .entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

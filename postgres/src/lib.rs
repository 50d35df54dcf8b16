//! `PostgreSQL` store for the tutoring booking core.
//!
//! Implements the [`Store`] and [`Transaction`] seams from `tutoring-core` on
//! top of a sqlx connection pool:
//!
//! - One database transaction per unit of work
//! - Row locks (`SELECT ... FOR UPDATE`) on slots and bookings
//! - `FOR NO KEY UPDATE` on user wallets, so the `FOR KEY SHARE` lock a
//!   booking insert takes through its `users` foreign keys never blocks it
//! - Transaction-scoped advisory locks on the platform and escrow accounts
//! - Compare-and-set session transitions via `rows_affected`
//!
//! # Example
//!
//! ```ignore
//! use tutoring_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/tutoring", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod rows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rows::{
    BOOKING_COLUMNS, ENTRY_COLUMNS, SESSION_COLUMNS, SLOT_COLUMNS, TRANSACTION_COLUMNS,
    USER_COLUMNS,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tutoring_core::{
    Account, Booking, BookingId, Credits, Error, LedgerEntry, Posting, Result, Role, Session,
    SessionId, SessionStatus, Slot, SlotId, Store, Transaction, TransactionId, User, UserId,
};

/// Map a driver failure onto the core taxonomy.
pub(crate) fn db(error: sqlx::Error) -> Error {
    Error::Storage(error.to_string())
}

fn not_found_or(entity: &'static str, id: impl ToString) -> impl FnOnce(sqlx::Error) -> Error {
    move |error| match error {
        sqlx::Error::RowNotFound => Error::not_found(entity, id),
        other => db(other),
    }
}

/// PostgreSQL-backed [`Store`].
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(db)?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// One database transaction. Dropping it rolls back.
struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    async fn one<T>(
        &mut self,
        sql: &str,
        id: uuid::Uuid,
        entity: &'static str,
        decode: fn(&sqlx::postgres::PgRow) -> Result<T>,
    ) -> Result<T> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(not_found_or(entity, id))?;
        decode(&row)
    }

    async fn bookings_where(&mut self, sql: &str, id: uuid::Uuid) -> Result<Vec<Booking>> {
        sqlx::query(sql)
            .bind(id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?
            .iter()
            .map(rows::booking)
            .collect()
    }

    async fn sessions(
        &mut self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<Session>> {
        query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?
            .iter()
            .map(rows::session)
            .collect()
    }

    async fn system_balance(&mut self, account: &Account) -> Result<Credits> {
        let latest: Option<i64> = sqlx::query_scalar(
            "SELECT balance_after FROM ledger_entries WHERE account = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(account.key())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db)?;
        Ok(Credits::new(latest.unwrap_or_default()))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_user(&mut self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, name, credit_balance) VALUES ($1, $2, $3)")
            .bind(user.id.as_uuid())
            .bind(&user.name)
            .bind(user.credit_balance.amount())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn load_user(&mut self, id: UserId) -> Result<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.one(&sql, *id.as_uuid(), "user", rows::user).await
    }

    async fn set_cached_balance(&mut self, id: UserId, balance: Credits) -> Result<()> {
        let result = sqlx::query("UPDATE users SET credit_balance = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(balance.amount())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("user", id));
        }
        Ok(())
    }

    async fn insert_slot(&mut self, slot: &Slot) -> Result<()> {
        let sql = format!(
            "INSERT INTO booking_slots ({SLOT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&sql)
            .bind(slot.id.as_uuid())
            .bind(slot.teacher_id.as_uuid())
            .bind(slot.date)
            .bind(slot.start_time)
            .bind(slot.end_time)
            .bind(slot.price.amount())
            .bind(slot.is_booked)
            .bind(slot.student_id.map(|id| *id.as_uuid()))
            .bind(slot.booking_id.map(|id| *id.as_uuid()))
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn load_slot(&mut self, id: SlotId) -> Result<Slot> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM booking_slots WHERE id = $1");
        self.one(&sql, *id.as_uuid(), "slot", rows::slot).await
    }

    async fn lock_slot(&mut self, id: SlotId) -> Result<Slot> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM booking_slots WHERE id = $1 FOR UPDATE");
        self.one(&sql, *id.as_uuid(), "slot", rows::slot).await
    }

    async fn update_slot(&mut self, slot: &Slot) -> Result<()> {
        let result = sqlx::query(
            "UPDATE booking_slots SET is_booked = $2, student_id = $3, booking_id = $4 WHERE id = $1",
        )
        .bind(slot.id.as_uuid())
        .bind(slot.is_booked)
        .bind(slot.student_id.map(|id| *id.as_uuid()))
        .bind(slot.booking_id.map(|id| *id.as_uuid()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref inner) if inner.is_unique_violation() => {
                Error::Conflict(format!("slot {} is unavailable", slot.id))
            }
            other => db(other),
        })?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("slot", slot.id));
        }
        Ok(())
    }

    async fn delete_slot(&mut self, id: SlotId) -> Result<()> {
        let result = sqlx::query("DELETE FROM booking_slots WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("slot", id));
        }
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> Result<()> {
        let sql = format!(
            "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        sqlx::query(&sql)
            .bind(session.id.as_uuid())
            .bind(session.status.as_str())
            .bind(session.scheduled_at)
            .bind(session.duration_minutes)
            .bind(session.opened_at)
            .bind(session.closed_at)
            .bind(session.auto_opened)
            .bind(session.auto_closed)
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;
        Ok(())
    }

    async fn load_session(&mut self, id: SessionId) -> Result<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        self.one(&sql, *id.as_uuid(), "session", rows::session).await
    }

    async fn transition_session(
        &mut self,
        expected: SessionStatus,
        next: &Session,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions \
             SET status = $3, opened_at = $4, closed_at = $5, auto_opened = $6, auto_closed = $7 \
             WHERE id = $1 AND status = $2",
        )
        .bind(next.id.as_uuid())
        .bind(expected.as_str())
        .bind(next.status.as_str())
        .bind(next.opened_at)
        .bind(next.closed_at)
        .bind(next.auto_opened)
        .bind(next.auto_closed)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 1 {
            return Ok(true);
        }
        // distinguish a lost race from a missing row
        self.load_session(next.id).await?;
        Ok(false)
    }

    async fn sessions_due_to_open(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status = 'scheduled' AND scheduled_at BETWEEN $1 AND $2 \
             ORDER BY scheduled_at"
        );
        self.sessions(sqlx::query(&sql).bind(from).bind(to)).await
    }

    async fn sessions_due_to_close(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE status IN ('scheduled', 'live') \
               AND scheduled_at + make_interval(mins => duration_minutes::int) <= $1 \
             ORDER BY scheduled_at"
        );
        self.sessions(sqlx::query(&sql).bind(cutoff)).await
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<()> {
        let sql = format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&sql)
            .bind(booking.id.as_uuid())
            .bind(booking.session_id.as_uuid())
            .bind(booking.slot_id.as_uuid())
            .bind(booking.student_id.as_uuid())
            .bind(booking.teacher_id.as_uuid())
            .bind(booking.status.as_str())
            .bind(booking.credits_paid.amount())
            .bind(booking.credits_refunded.amount())
            .bind(booking.scheduled_at)
            .bind(&booking.notes)
            .bind(&booking.cancellation_reason)
            .bind(booking.cancelled_by.map(|role| role.as_str()))
            .bind(booking.cancelled_at)
            .bind(booking.completed_at)
            .bind(booking.reminder_24h_sent)
            .bind(booking.reminder_1h_sent)
            .bind(booking.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref inner) if inner.is_unique_violation() => {
                    Error::Conflict(format!("slot {} already has a booking", booking.slot_id))
                }
                other => db(other),
            })?;
        Ok(())
    }

    async fn load_booking(&mut self, id: BookingId) -> Result<Booking> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        self.one(&sql, *id.as_uuid(), "booking", rows::booking).await
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        self.one(&sql, *id.as_uuid(), "booking", rows::booking).await
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        let result = sqlx::query(
            "UPDATE bookings SET status = $2, credits_refunded = $3, cancellation_reason = $4, \
             cancelled_by = $5, cancelled_at = $6, completed_at = $7, \
             reminder_24h_sent = $8, reminder_1h_sent = $9 \
             WHERE id = $1",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.status.as_str())
        .bind(booking.credits_refunded.amount())
        .bind(&booking.cancellation_reason)
        .bind(booking.cancelled_by.map(|role| role.as_str()))
        .bind(booking.cancelled_at)
        .bind(booking.completed_at)
        .bind(booking.reminder_24h_sent)
        .bind(booking.reminder_1h_sent)
        .execute(&mut *self.tx)
        .await
        .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("booking", booking.id));
        }
        Ok(())
    }

    async fn bookings_for_user(&mut self, user: UserId, role: Role) -> Result<Vec<Booking>> {
        let column = match role {
            Role::Student => "student_id",
            Role::Teacher => "teacher_id",
        };
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {column} = $1 ORDER BY scheduled_at DESC"
        );
        self.bookings_where(&sql, *user.as_uuid()).await
    }

    async fn bookings_for_session(&mut self, session: SessionId) -> Result<Vec<Booking>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE session_id = $1 ORDER BY created_at, id"
        );
        self.bookings_where(&sql, *session.as_uuid()).await
    }

    async fn lock_balance(&mut self, account: &Account) -> Result<Credits> {
        match account.user_id() {
            Some(id) => {
                // must stay compatible with the FK key-share lock a booking insert holds
                let balance: i64 = sqlx::query_scalar(
                    "SELECT credit_balance FROM users WHERE id = $1 FOR NO KEY UPDATE",
                )
                .bind(id.as_uuid())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(not_found_or("user", id))?;
                Ok(Credits::new(balance))
            }
            None => {
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind(account.key())
                    .execute(&mut *self.tx)
                    .await
                    .map_err(db)?;
                self.system_balance(account).await
            }
        }
    }

    async fn balance(&mut self, account: &Account) -> Result<Credits> {
        match account.user_id() {
            Some(id) => Ok(self.load_user(id).await?.credit_balance),
            None => self.system_balance(account).await,
        }
    }

    async fn insert_posting(&mut self, posting: &Posting) -> Result<()> {
        let header = &posting.transaction;
        let sql = format!(
            "INSERT INTO ledger_transactions ({TRANSACTION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)"
        );
        sqlx::query(&sql)
            .bind(header.id.as_uuid())
            .bind(header.group_id.as_uuid())
            .bind(&header.description)
            .bind(header.transaction_type.as_str())
            .bind(&header.reference_id)
            .bind(&header.metadata)
            .bind(header.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db)?;

        let sql = format!(
            "INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        );
        for entry in &posting.entries {
            sqlx::query(&sql)
                .bind(entry.id.as_uuid())
                .bind(entry.transaction_id.as_uuid())
                .bind(entry.account.key())
                .bind(entry.entry_type.as_str())
                .bind(entry.amount.amount())
                .bind(entry.balance_after.amount())
                .bind(&entry.description)
                .bind(entry.created_at)
                .execute(&mut *self.tx)
                .await
                .map_err(db)?;
        }
        Ok(())
    }

    async fn load_posting(&mut self, id: TransactionId) -> Result<Posting> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions WHERE id = $1");
        let transaction = self
            .one(&sql, *id.as_uuid(), "transaction", rows::transaction)
            .await?;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE transaction_id = $1 ORDER BY seq"
        );
        let entries = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?
            .iter()
            .map(rows::entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Posting {
            transaction,
            entries,
        })
    }

    async fn entries_for(&mut self, account: &Account) -> Result<Vec<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE account = $1 ORDER BY seq");
        sqlx::query(&sql)
            .bind(account.key())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db)?
            .iter()
            .map(rows::entry)
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(db)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(db)
    }
}

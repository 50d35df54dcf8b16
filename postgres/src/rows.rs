//! Row decoding.

use crate::db;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;
use std::str::FromStr;
use tutoring_core::{
    Account, Booking, BookingId, BookingStatus, Credits, EntryId, EntryType, Error, LedgerEntry,
    LedgerTransaction, Result, Role, Session, SessionId, SessionStatus, Slot, SlotId,
    TransactionGroupId, TransactionId, TransactionType, User, UserId,
};
use uuid::Uuid;

pub(crate) const USER_COLUMNS: &str = "id, name, credit_balance";

pub(crate) const SLOT_COLUMNS: &str =
    "id, teacher_id, date, start_time, end_time, price_credits, is_booked, student_id, booking_id";

pub(crate) const SESSION_COLUMNS: &str =
    "id, status, scheduled_at, duration_minutes, opened_at, closed_at, auto_opened, auto_closed";

pub(crate) const BOOKING_COLUMNS: &str = "id, session_id, slot_id, student_id, teacher_id, \
     status, credits_paid, credits_refunded, scheduled_at, notes, cancellation_reason, \
     cancelled_by, cancelled_at, completed_at, reminder_24h_sent, reminder_1h_sent, created_at";

pub(crate) const TRANSACTION_COLUMNS: &str =
    "id, group_id, description, transaction_type, reference_id, metadata, created_at";

pub(crate) const ENTRY_COLUMNS: &str = "id, transaction_id, account, entry_type, amount, \
     balance_after, description, created_at";

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(db)
}

fn parse<T: FromStr<Err = Error>>(row: &PgRow, column: &str) -> Result<T> {
    get::<String>(row, column)?.parse()
}

fn credits(row: &PgRow, column: &str) -> Result<Credits> {
    get::<i64>(row, column).map(Credits::new)
}

pub(crate) fn user(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(get(row, "id")?),
        name: get(row, "name")?,
        credit_balance: credits(row, "credit_balance")?,
    })
}

pub(crate) fn slot(row: &PgRow) -> Result<Slot> {
    Ok(Slot {
        id: SlotId::from_uuid(get(row, "id")?),
        teacher_id: UserId::from_uuid(get(row, "teacher_id")?),
        date: get::<NaiveDate>(row, "date")?,
        start_time: get::<NaiveTime>(row, "start_time")?,
        end_time: get::<NaiveTime>(row, "end_time")?,
        price: credits(row, "price_credits")?,
        is_booked: get(row, "is_booked")?,
        booking_id: get::<Option<Uuid>>(row, "booking_id")?.map(BookingId::from_uuid),
        student_id: get::<Option<Uuid>>(row, "student_id")?.map(UserId::from_uuid),
    })
}

pub(crate) fn session(row: &PgRow) -> Result<Session> {
    Ok(Session {
        id: SessionId::from_uuid(get(row, "id")?),
        status: parse::<SessionStatus>(row, "status")?,
        scheduled_at: get(row, "scheduled_at")?,
        duration_minutes: get(row, "duration_minutes")?,
        opened_at: get(row, "opened_at")?,
        closed_at: get(row, "closed_at")?,
        auto_opened: get(row, "auto_opened")?,
        auto_closed: get(row, "auto_closed")?,
    })
}

pub(crate) fn booking(row: &PgRow) -> Result<Booking> {
    let cancelled_by = get::<Option<String>>(row, "cancelled_by")?
        .map(|raw| {
            raw.parse::<Role>()
                .map_err(|_| Error::Storage(format!("invalid role: {raw}")))
        })
        .transpose()?;
    Ok(Booking {
        id: BookingId::from_uuid(get(row, "id")?),
        session_id: SessionId::from_uuid(get(row, "session_id")?),
        slot_id: SlotId::from_uuid(get(row, "slot_id")?),
        student_id: UserId::from_uuid(get(row, "student_id")?),
        teacher_id: UserId::from_uuid(get(row, "teacher_id")?),
        status: parse::<BookingStatus>(row, "status")?,
        credits_paid: credits(row, "credits_paid")?,
        credits_refunded: credits(row, "credits_refunded")?,
        scheduled_at: get(row, "scheduled_at")?,
        notes: get(row, "notes")?,
        cancellation_reason: get(row, "cancellation_reason")?,
        cancelled_by,
        cancelled_at: get::<Option<DateTime<Utc>>>(row, "cancelled_at")?,
        completed_at: get::<Option<DateTime<Utc>>>(row, "completed_at")?,
        reminder_24h_sent: get(row, "reminder_24h_sent")?,
        reminder_1h_sent: get(row, "reminder_1h_sent")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn transaction(row: &PgRow) -> Result<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: TransactionId::from_uuid(get(row, "id")?),
        group_id: TransactionGroupId::from_uuid(get(row, "group_id")?),
        description: get(row, "description")?,
        transaction_type: parse::<TransactionType>(row, "transaction_type")?,
        reference_id: get(row, "reference_id")?,
        metadata: get::<serde_json::Value>(row, "metadata")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn entry(row: &PgRow) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: EntryId::from_uuid(get(row, "id")?),
        transaction_id: TransactionId::from_uuid(get(row, "transaction_id")?),
        account: parse::<Account>(row, "account")?,
        entry_type: parse::<EntryType>(row, "entry_type")?,
        amount: credits(row, "amount")?,
        balance_after: credits(row, "balance_after")?,
        description: get(row, "description")?,
        created_at: get(row, "created_at")?,
    })
}

//! Ledger accounts and their sign conventions.
//!
//! An account is either a user's wallet or one of the two system clearing
//! accounts. User accounts are "my money": a DEBIT lowers the balance and a
//! CREDIT raises it. System accounts are mirror-signed: a DEBIT raises the
//! signed balance and a CREDIT lowers it.
//!
//! The persisted key keeps the historical string form (`user-<uuid>`,
//! `platform`, `escrow`); everything above the storage layer works with the
//! tagged variant.

use crate::error::Error;
use crate::types::{Credits, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const USER_PREFIX: &str = "user-";

/// A ledger account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "lowercase")]
pub enum Account {
    /// A user's wallet
    User(UserId),
    /// Platform revenue / issuance account
    Platform,
    /// Clearing account holding funds for sessions not yet finalized
    Escrow,
}

/// Side of a double-entry posting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Debit side
    Debit,
    /// Credit side
    Credit,
}

impl EntryType {
    /// Database representation (`DEBIT` / `CREDIT`)
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "DEBIT",
            Self::Credit => "CREDIT",
        }
    }
}

impl FromStr for EntryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEBIT" => Ok(Self::Debit),
            "CREDIT" => Ok(Self::Credit),
            other => Err(Error::Storage(format!("invalid entry type: {other}"))),
        }
    }
}

impl Account {
    /// True for the platform and escrow accounts.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::Platform | Self::Escrow)
    }

    /// The user behind a wallet account.
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Platform | Self::Escrow => None,
        }
    }

    /// Persisted account key.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("{USER_PREFIX}{id}"),
            Self::Platform => "platform".to_string(),
            Self::Escrow => "escrow".to_string(),
        }
    }

    /// Signed change an entry of `entry_type` and `amount` makes to this account.
    #[must_use]
    pub fn delta(&self, entry_type: EntryType, amount: Credits) -> Credits {
        match (self.is_system(), entry_type) {
            (false, EntryType::Credit) | (true, EntryType::Debit) => amount,
            (false, EntryType::Debit) | (true, EntryType::Credit) => -amount,
        }
    }

    /// Balance after applying one entry to `current`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the balance would overflow.
    pub fn apply(
        &self,
        current: Credits,
        entry_type: EntryType,
        amount: Credits,
    ) -> Result<Credits, Error> {
        current
            .checked_add(self.delta(entry_type, amount))
            .ok_or_else(|| Error::Validation(format!("balance of {self} would overflow")))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl FromStr for Account {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform" => Ok(Self::Platform),
            "escrow" => Ok(Self::Escrow),
            other => other
                .strip_prefix(USER_PREFIX)
                .and_then(|id| id.parse::<UserId>().ok())
                .map(Self::User)
                .ok_or_else(|| Error::Storage(format!("invalid account key: {other}"))),
        }
    }
}

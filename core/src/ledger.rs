//! Double-entry ledger model.
//!
//! A [`PostingRequest`] describes a balanced set of entries. It is validated
//! and turned into an immutable [`LedgerTransaction`] plus its
//! [`LedgerEntry`] rows once the current balances of the touched accounts are
//! known. The storage side (locking, persistence, cache write-through) lives
//! in the runtime's `Ledger` service.

use crate::account::{Account, EntryType};
use crate::error::{Error, Result};
use crate::types::{Credits, EntryId, TransactionGroupId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Business meaning of a ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Student pays for a booking into escrow
    Deduction,
    /// Escrow returns funds to a student
    Refund,
    /// Credits issued to a user (top-up)
    Purchase,
    /// Escrow split between platform and teacher
    RevenueSharing,
    /// Plain movement between two accounts
    Transfer,
}

impl TransactionType {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deduction => "deduction",
            Self::Refund => "refund",
            Self::Purchase => "purchase",
            Self::RevenueSharing => "revenue_sharing",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deduction" => Ok(Self::Deduction),
            "refund" => Ok(Self::Refund),
            "purchase" => Ok(Self::Purchase),
            "revenue_sharing" => Ok(Self::RevenueSharing),
            "transfer" => Ok(Self::Transfer),
            other => Err(Error::Storage(format!("invalid transaction type: {other}"))),
        }
    }
}

/// One leg of a posting, before balances are known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntrySpec {
    /// Account the leg applies to
    pub account: Account,
    /// Debit or credit
    pub entry_type: EntryType,
    /// Strictly positive amount
    pub amount: Credits,
    /// Per-entry description
    pub description: String,
}

impl EntrySpec {
    /// Debit leg
    #[must_use]
    pub fn debit(account: Account, amount: Credits, description: impl Into<String>) -> Self {
        Self {
            account,
            entry_type: EntryType::Debit,
            amount,
            description: description.into(),
        }
    }

    /// Credit leg
    #[must_use]
    pub fn credit(account: Account, amount: Credits, description: impl Into<String>) -> Self {
        Self {
            account,
            entry_type: EntryType::Credit,
            amount,
            description: description.into(),
        }
    }
}

/// An immutable, posted ledger transaction header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Transaction id
    pub id: TransactionId,
    /// Group shared by all transactions of one business event
    pub group_id: TransactionGroupId,
    /// Human readable description
    pub description: String,
    /// Business meaning
    pub transaction_type: TransactionType,
    /// Optional reference (booking id)
    pub reference_id: Option<String>,
    /// Free-form metadata
    pub metadata: serde_json::Value,
    /// When the transaction was posted
    pub created_at: DateTime<Utc>,
}

/// An immutable ledger entry with its running balance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id
    pub id: EntryId,
    /// Owning transaction
    pub transaction_id: TransactionId,
    /// Account the entry applies to
    pub account: Account,
    /// Debit or credit
    pub entry_type: EntryType,
    /// Strictly positive amount
    pub amount: Credits,
    /// Signed balance of `account` right after this entry
    pub balance_after: Credits,
    /// Per-entry description
    pub description: String,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// A transaction together with its entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Transaction header
    pub transaction: LedgerTransaction,
    /// Entries in posting order
    pub entries: Vec<LedgerEntry>,
}

impl Posting {
    /// `balance_after` of the last entry touching `account` in this posting.
    #[must_use]
    pub fn balance_of(&self, account: &Account) -> Option<Credits> {
        self.entries
            .iter()
            .rev()
            .find(|e| &e.account == account)
            .map(|e| e.balance_after)
    }
}

/// A balanced set of entries waiting to be posted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostingRequest {
    /// Entries (two for most postings, three for a revenue split)
    pub entries: SmallVec<[EntrySpec; 3]>,
    /// Transaction description
    pub description: String,
    /// Business meaning
    pub transaction_type: TransactionType,
    /// Optional reference (booking id)
    pub reference_id: Option<String>,
    /// Free-form metadata
    pub metadata: serde_json::Value,
    /// Group id; a fresh one is generated when absent
    pub group_id: Option<TransactionGroupId>,
}

impl PostingRequest {
    /// Creates a request from explicit entries.
    #[must_use]
    pub fn new(
        entries: SmallVec<[EntrySpec; 3]>,
        description: impl Into<String>,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            entries,
            description: description.into(),
            transaction_type,
            reference_id: None,
            metadata: serde_json::Value::Null,
            group_id: None,
        }
    }

    /// Attach a reference id.
    #[must_use]
    pub fn with_reference(mut self, reference_id: impl ToString) -> Self {
        self.reference_id = Some(reference_id.to_string());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Join an existing transaction group.
    #[must_use]
    pub fn in_group(mut self, group_id: TransactionGroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Student pays `amount` into escrow: DEBIT user / CREDIT escrow.
    #[must_use]
    pub fn deduction(user: UserId, amount: Credits, description: &str) -> Self {
        Self::new(
            smallvec![
                EntrySpec::debit(Account::User(user), amount, description),
                EntrySpec::credit(Account::Escrow, amount, description),
            ],
            description,
            TransactionType::Deduction,
        )
    }

    /// Escrow returns `amount` to a student: DEBIT escrow / CREDIT user.
    #[must_use]
    pub fn refund(user: UserId, amount: Credits, description: &str) -> Self {
        Self::new(
            smallvec![
                EntrySpec::debit(Account::Escrow, amount, description),
                EntrySpec::credit(Account::User(user), amount, description),
            ],
            description,
            TransactionType::Refund,
        )
    }

    /// Credits issued to a user: DEBIT platform / CREDIT user.
    #[must_use]
    pub fn add_credits(user: UserId, amount: Credits, description: &str) -> Self {
        Self::new(
            smallvec![
                EntrySpec::debit(Account::Platform, amount, description),
                EntrySpec::credit(Account::User(user), amount, description),
            ],
            description,
            TransactionType::Purchase,
        )
    }

    /// Plain movement: DEBIT `from` / CREDIT `to`.
    #[must_use]
    pub fn transfer(from: Account, to: Account, amount: Credits, description: &str) -> Self {
        Self::new(
            smallvec![
                EntrySpec::debit(from, amount, description),
                EntrySpec::credit(to, amount, description),
            ],
            description,
            TransactionType::Transfer,
        )
    }

    /// Escrow split: DEBIT escrow(total) / CREDIT platform(floor(total * pct / 100))
    /// / CREDIT teacher(remainder). Zero-amount legs are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when `platform_percent > 100`.
    pub fn revenue_share(
        teacher: UserId,
        total: Credits,
        platform_percent: u8,
        description: &str,
    ) -> Result<Self> {
        if platform_percent > 100 {
            return Err(Error::Validation(format!(
                "platform percent must be at most 100, got {platform_percent}"
            )));
        }
        let platform_cut = total.percent_floor(platform_percent);
        let teacher_cut = total - platform_cut;

        let mut entries: SmallVec<[EntrySpec; 3]> =
            smallvec![EntrySpec::debit(Account::Escrow, total, description)];
        if platform_cut.is_positive() {
            entries.push(EntrySpec::credit(Account::Platform, platform_cut, description));
        }
        if teacher_cut.is_positive() {
            entries.push(EntrySpec::credit(Account::User(teacher), teacher_cut, description));
        }

        Ok(Self::new(entries, description, TransactionType::RevenueSharing)
            .with_metadata(serde_json::json!({ "platform_percent": platform_percent })))
    }

    /// Check the double-entry preconditions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when there are fewer than two entries, any
    /// amount is outside `1..=Credits::MAX_AMOUNT`, or debits and credits differ.
    pub fn validate(&self) -> Result<()> {
        if self.entries.len() < 2 {
            return Err(Error::Validation(format!(
                "a transaction needs at least 2 entries, got {}",
                self.entries.len()
            )));
        }
        if let Some(bad) = self.entries.iter().find(|e| !e.amount.is_positive()) {
            return Err(Error::Validation(format!(
                "entry amount must be positive, got {} on {}",
                bad.amount.amount(),
                bad.account
            )));
        }
        if let Some(bad) = self.entries.iter().find(|e| !e.amount.is_valid_amount()) {
            return Err(Error::Validation(format!(
                "entry amount {} on {} exceeds the maximum of {}",
                bad.amount.amount(),
                bad.account,
                Credits::MAX_AMOUNT.amount()
            )));
        }
        let (debits, credits) = totals(self.entries.iter().map(|e| (e.entry_type, e.amount)));
        if debits != credits {
            return Err(Error::Validation(format!(
                "unbalanced transaction: debits {} != credits {}",
                debits.amount(),
                credits.amount()
            )));
        }
        Ok(())
    }

    /// Distinct accounts touched, in canonical lock order (by key).
    #[must_use]
    pub fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.entries.iter().map(|e| e.account).collect();
        accounts.sort_by_key(Account::key);
        accounts.dedup();
        accounts
    }

    /// Turn the request into a posting given the current balances of every
    /// touched account. Missing balances count as zero.
    ///
    /// # Errors
    ///
    /// Propagates [`PostingRequest::validate`] failures, and returns
    /// [`Error::Validation`] if a running balance would overflow.
    pub fn into_posting(
        self,
        balances: &HashMap<Account, Credits>,
        now: DateTime<Utc>,
    ) -> Result<Posting> {
        self.validate()?;

        let transaction = LedgerTransaction {
            id: TransactionId::new(),
            group_id: self.group_id.unwrap_or_default(),
            description: self.description,
            transaction_type: self.transaction_type,
            reference_id: self.reference_id,
            metadata: self.metadata,
            created_at: now,
        };

        let mut running = balances.clone();
        let entries = self
            .entries
            .into_iter()
            .map(|spec| {
                let current = running.get(&spec.account).copied().unwrap_or_default();
                let balance_after = spec.account.apply(current, spec.entry_type, spec.amount)?;
                running.insert(spec.account, balance_after);
                Ok(LedgerEntry {
                    id: EntryId::new(),
                    transaction_id: transaction.id,
                    account: spec.account,
                    entry_type: spec.entry_type,
                    amount: spec.amount,
                    balance_after,
                    description: spec.description,
                    created_at: now,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Posting {
            transaction,
            entries,
        })
    }
}

fn totals(entries: impl Iterator<Item = (EntryType, Credits)>) -> (Credits, Credits) {
    entries.fold((Credits::ZERO, Credits::ZERO), |(d, c), (kind, amount)| match kind {
        EntryType::Debit => (d + amount, c),
        EntryType::Credit => (d, c + amount),
    })
}

/// True when the entries of one transaction balance.
#[must_use]
pub fn is_balanced(entries: &[LedgerEntry]) -> bool {
    let (debits, credits) = totals(entries.iter().map(|e| (e.entry_type, e.amount)));
    debits == credits
}

/// Replay one account's entries (creation order) and check every
/// `balance_after`. Returns the final balance.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the first entry whose running balance
/// does not match.
pub fn replay(account: &Account, entries: &[LedgerEntry]) -> Result<Credits> {
    entries
        .iter()
        .filter(|e| &e.account == account)
        .try_fold(Credits::ZERO, |balance, entry| {
            let expected = account.apply(balance, entry.entry_type, entry.amount)?;
            if expected == entry.balance_after {
                Ok(expected)
            } else {
                Err(Error::Validation(format!(
                    "entry {} on {account}: balance_after {} but replay gives {}",
                    entry.id,
                    entry.balance_after.amount(),
                    expected.amount()
                )))
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH
    }

    #[test]
    fn rejects_single_entry() {
        let request = PostingRequest::new(
            smallvec![EntrySpec::debit(Account::Escrow, Credits::new(5), "x")],
            "x",
            TransactionType::Transfer,
        );
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_unbalanced_entries() {
        let request = PostingRequest::new(
            smallvec![
                EntrySpec::debit(Account::Escrow, Credits::new(5), "x"),
                EntrySpec::credit(Account::Platform, Credits::new(4), "x"),
            ],
            "x",
            TransactionType::Transfer,
        );
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("unbalanced"));
    }

    #[test]
    fn rejects_non_positive_amount() {
        let request = PostingRequest::transfer(Account::Escrow, Account::Platform, Credits::ZERO, "x");
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_amount_above_maximum() {
        let user = UserId::new();
        let too_much = Credits::new(Credits::MAX_AMOUNT.amount() + 1);
        let err = PostingRequest::add_credits(user, too_much, "top-up")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("maximum"));

        PostingRequest::add_credits(user, Credits::MAX_AMOUNT, "top-up")
            .validate()
            .unwrap();
    }

    #[test]
    fn overflowing_balance_fails_posting() {
        let user = UserId::new();
        let mut balances = HashMap::new();
        balances.insert(Account::User(user), Credits::new(i64::MAX - 1));

        let err = PostingRequest::add_credits(user, Credits::new(10), "top-up")
            .into_posting(&balances, now())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn deduction_moves_money_into_escrow() {
        let student = UserId::new();
        let mut balances = HashMap::new();
        balances.insert(Account::User(student), Credits::new(150));

        let posting = PostingRequest::deduction(student, Credits::new(100), "booking")
            .into_posting(&balances, now())
            .unwrap();

        assert_eq!(posting.balance_of(&Account::User(student)), Some(Credits::new(50)));
        assert_eq!(posting.balance_of(&Account::Escrow), Some(Credits::new(-100)));
        assert!(is_balanced(&posting.entries));
        assert_eq!(posting.transaction.transaction_type, TransactionType::Deduction);
    }

    #[test]
    fn revenue_share_is_three_balanced_legs() {
        let teacher = UserId::new();
        let request =
            PostingRequest::revenue_share(teacher, Credits::new(101), 20, "session payout").unwrap();
        assert_eq!(request.entries.len(), 3);
        assert_eq!(request.entries[1].amount, Credits::new(20));
        assert_eq!(request.entries[2].amount, Credits::new(81));
        request.validate().unwrap();
    }

    #[test]
    fn revenue_share_drops_zero_legs() {
        let teacher = UserId::new();
        let all_teacher =
            PostingRequest::revenue_share(teacher, Credits::new(100), 0, "payout").unwrap();
        assert_eq!(all_teacher.entries.len(), 2);
        all_teacher.validate().unwrap();

        assert!(PostingRequest::revenue_share(teacher, Credits::new(100), 101, "payout").is_err());
    }

    #[test]
    fn accounts_are_in_lock_order() {
        let teacher = UserId::new();
        let request =
            PostingRequest::revenue_share(teacher, Credits::new(100), 30, "payout").unwrap();
        assert_eq!(
            request.accounts(),
            vec![Account::Escrow, Account::Platform, Account::User(teacher)]
        );
    }

    #[test]
    fn replay_detects_tampering() {
        let user = UserId::new();
        let account = Account::User(user);
        let mut posting = PostingRequest::add_credits(user, Credits::new(10), "top-up")
            .into_posting(&HashMap::new(), now())
            .unwrap();
        assert_eq!(replay(&account, &posting.entries).unwrap(), Credits::new(10));

        for entry in &mut posting.entries {
            if entry.account == account {
                entry.balance_after = Credits::new(11);
            }
        }
        assert!(replay(&account, &posting.entries).is_err());
    }

    proptest! {
        #[test]
        fn postings_always_balance(total in 1i64..1_000_000, pct in 0u8..=100) {
            let request = PostingRequest::revenue_share(UserId::new(), Credits::new(total), pct, "p").unwrap();
            let posting = request.into_posting(&HashMap::new(), now()).unwrap();
            prop_assert!(is_balanced(&posting.entries));
        }
    }
}

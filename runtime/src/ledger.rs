//! The ledger service: posting, balances and audit reads.
//!
//! Every posting runs inside the caller's transaction when one is supplied
//! (`*_in` methods), so the money movement commits or rolls back together with
//! the booking, slot and session writes around it. The standalone methods
//! open and finish their own transaction.

use crate::finish;
use crate::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tutoring_core::{
    Account, Clock, Credits, Error, LedgerEntry, Posting, PostingRequest, Result,
    Store, Transaction, TransactionId, UserId, ledger,
};

/// Double-entry ledger over a [`Store`].
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Creates a ledger service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Post a balanced transaction in its own unit of work.
    ///
    /// # Errors
    ///
    /// See [`Ledger::post_in`].
    pub async fn post(&self, request: PostingRequest) -> Result<Posting> {
        let mut tx = self.store.begin().await?;
        let result = self.post_in(tx.as_mut(), request).await;
        finish(tx, result).await
    }

    /// Post a balanced transaction inside `tx`.
    ///
    /// Locks every touched account in key order, computes running balances,
    /// appends the transaction and its entries, then writes each user's new
    /// balance through to the cached `credit_balance`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the entries are not a balanced set of
    ///   positive amounts (nothing is written)
    /// - [`Error::InsufficientFunds`] if a user account would go negative
    pub async fn post_in(
        &self,
        tx: &mut dyn Transaction,
        request: PostingRequest,
    ) -> Result<Posting> {
        request.validate()?;

        let accounts = request.accounts();
        let mut balances = HashMap::with_capacity(accounts.len());
        for account in &accounts {
            balances.insert(*account, tx.lock_balance(account).await?);
        }

        let posting = request.into_posting(&balances, self.clock.now())?;

        for account in &accounts {
            let Some(user) = account.user_id() else {
                continue;
            };
            let after = posting.balance_of(account).unwrap_or_default();
            if after < Credits::ZERO {
                let available = balances.get(account).copied().unwrap_or_default();
                return Err(Error::InsufficientFunds {
                    required: available - after,
                    available,
                });
            }
            tx.set_cached_balance(user, after).await?;
        }

        tx.insert_posting(&posting).await?;

        tracing::debug!(
            transaction_id = %posting.transaction.id,
            transaction_type = %posting.transaction.transaction_type,
            entries = posting.entries.len(),
            "Ledger transaction posted"
        );
        metrics::record_posting(posting.transaction.transaction_type.as_str());
        Ok(posting)
    }

    /// Move `amount` from a student's wallet into escrow inside `tx`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the user does not exist
    /// - [`Error::InsufficientFunds`] if the balance is below `amount`
    /// - [`Error::Validation`] if `amount` is not positive
    pub async fn deduct_in(
        &self,
        tx: &mut dyn Transaction,
        user: UserId,
        amount: Credits,
        description: &str,
        reference: Option<&str>,
    ) -> Result<Posting> {
        let available = tx.load_user(user).await?.credit_balance;
        if available < amount {
            return Err(Error::InsufficientFunds {
                required: amount,
                available,
            });
        }
        let mut request = PostingRequest::deduction(user, amount, description);
        if let Some(reference) = reference {
            request = request.with_reference(reference);
        }
        self.post_in(tx, request).await
    }

    /// [`Ledger::deduct_in`] in its own unit of work.
    ///
    /// # Errors
    ///
    /// See [`Ledger::deduct_in`].
    pub async fn deduct(
        &self,
        user: UserId,
        amount: Credits,
        description: &str,
        reference: Option<&str>,
    ) -> Result<Posting> {
        let mut tx = self.store.begin().await?;
        let result = self
            .deduct_in(tx.as_mut(), user, amount, description, reference)
            .await;
        finish(tx, result).await
    }

    /// Return `amount` from escrow to a student inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `amount` is not positive.
    pub async fn refund_in(
        &self,
        tx: &mut dyn Transaction,
        user: UserId,
        amount: Credits,
        description: &str,
        reference: &str,
    ) -> Result<Posting> {
        let request = PostingRequest::refund(user, amount, description).with_reference(reference);
        self.post_in(tx, request).await
    }

    /// Issue credits to a user (DEBIT platform / CREDIT user).
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the user does not exist
    /// - [`Error::Validation`] if `amount` is not positive
    pub async fn add_credits(
        &self,
        user: UserId,
        amount: Credits,
        description: &str,
        reference: Option<&str>,
    ) -> Result<Posting> {
        let mut tx = self.store.begin().await?;
        let result = async {
            tx.load_user(user).await?;
            let mut request = PostingRequest::add_credits(user, amount, description);
            if let Some(reference) = reference {
                request = request.with_reference(reference);
            }
            self.post_in(tx.as_mut(), request).await
        }
        .await;
        finish(tx, result).await
    }

    /// Split `total` held in escrow between the platform and a teacher.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the teacher does not exist
    /// - [`Error::Validation`] if `platform_percent > 100` or `total` is not
    ///   positive
    pub async fn share_revenue(
        &self,
        teacher: UserId,
        total: Credits,
        platform_percent: u8,
        description: &str,
        reference: Option<&str>,
    ) -> Result<Posting> {
        let mut tx = self.store.begin().await?;
        let result = async {
            tx.load_user(teacher).await?;
            let mut request =
                PostingRequest::revenue_share(teacher, total, platform_percent, description)?;
            if let Some(reference) = reference {
                request = request.with_reference(reference);
            }
            self.post_in(tx.as_mut(), request).await
        }
        .await;
        finish(tx, result).await
    }

    /// Signed balance of an account.
    ///
    /// Users read the cached balance; system accounts read the latest entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown user.
    pub async fn get_balance(&self, account: &Account) -> Result<Credits> {
        let mut tx = self.store.begin().await?;
        let result = tx.balance(account).await;
        finish(tx, result).await
    }

    /// Credits currently held in escrow, as a positive amount.
    ///
    /// Escrow is mirror-signed, so holding funds reads negative; this flips it.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn escrow_held(&self) -> Result<Credits> {
        Ok(-self.get_balance(&Account::Escrow).await?)
    }

    /// A posted transaction with its entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such transaction exists.
    pub async fn transaction(&self, id: TransactionId) -> Result<Posting> {
        let mut tx = self.store.begin().await?;
        let result = tx.load_posting(id).await;
        finish(tx, result).await
    }

    /// Every entry of `account`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn entries_for(&self, account: &Account) -> Result<Vec<LedgerEntry>> {
        let mut tx = self.store.begin().await?;
        let result = tx.entries_for(account).await;
        finish(tx, result).await
    }

    /// Replay an account's entries and check every `balance_after`; for users
    /// also check the cached balance. Returns the replayed balance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] describing the first mismatch.
    pub async fn verify_account(&self, account: &Account) -> Result<Credits> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let entries = tx.entries_for(account).await?;
            let replayed = ledger::replay(account, &entries)?;
            if let Some(user) = account.user_id() {
                let cached = tx.load_user(user).await?.credit_balance;
                if cached != replayed {
                    return Err(Error::Validation(format!(
                        "cached balance of {account} is {} but ledger says {}",
                        cached.amount(),
                        replayed.amount()
                    )));
                }
            }
            Ok(replayed)
        }
        .await;
        finish(tx, result).await
    }
}

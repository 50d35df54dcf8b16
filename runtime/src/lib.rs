//! # Tutoring Runtime
//!
//! Services that execute the booking core against a [`Store`]:
//!
//! - [`Ledger`]: double-entry postings, balances, audit reads
//! - [`SlotRegistry`]: publish, withdraw and lock slots
//! - [`BookingService`]: atomic booking creation and reads
//! - [`RefundEngine`]: cancellation with policy-driven refunds
//! - [`SessionScheduler`]: time-driven open/close sweeps and operator overrides
//!
//! Notifications leave through a [`Dispatcher`] after commit; they never
//! influence the outcome of an operation.
//!
//! # Example
//!
//! ```ignore
//! use tutoring_runtime::{Services, Settings};
//!
//! let services = Services::new(store, clock, notifier, Settings::default());
//! let receipt = services.bookings.create(student_id, slot_id, None).await?;
//! let refund = services.refunds.cancel(receipt.booking.id, student_id, None).await?;
//! ```

pub mod booking;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod refund;
pub mod retry;
pub mod scheduler;
pub mod slots;

pub use booking::{BookingReceipt, BookingService};
pub use health::{HealthCheck, HealthStatus};
pub use ledger::Ledger;
pub use notify::{Dispatcher, LogNotifier};
pub use refund::{BatchRefundSummary, RefundEngine, RefundResult};
pub use retry::RetryPolicy;
pub use scheduler::{SchedulerConfig, SessionScheduler, SweepReport, Transition};
pub use slots::SlotRegistry;

use std::sync::Arc;
use tutoring_core::{Clock, Notifier, RefundPolicy, Result, Store, Transaction};

/// Commit on success, roll back on failure, and hand back `result`.
///
/// A failed rollback is logged; the original error wins.
pub(crate) async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = tx.rollback().await {
                tracing::warn!(%error, %rollback_error, "Rollback failed");
            }
            Err(error)
        }
    }
}

/// Tunables shared by the services.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    /// Refund policy
    pub refund_policy: RefundPolicy,
    /// Scheduler timing
    pub scheduler: SchedulerConfig,
    /// Session length when a slot has no usable window
    pub default_session_minutes: i64,
    /// Notification retry
    pub notify_retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            refund_policy: RefundPolicy::default(),
            scheduler: SchedulerConfig::default(),
            default_session_minutes: 60,
            notify_retry: RetryPolicy::default(),
        }
    }
}

/// Every service wired to one store, clock and notifier.
#[derive(Clone)]
pub struct Services {
    /// Ledger
    pub ledger: Ledger,
    /// Slot registry
    pub slots: SlotRegistry,
    /// Booking aggregate
    pub bookings: BookingService,
    /// Refund engine
    pub refunds: RefundEngine,
    /// Lifecycle scheduler
    pub scheduler: SessionScheduler,
    store: Arc<dyn Store>,
}

impl Services {
    /// Wire the services.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: Settings,
    ) -> Self {
        let dispatcher = Dispatcher::new(notifier, settings.notify_retry);
        let ledger = Ledger::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            slots: SlotRegistry::new(Arc::clone(&store)),
            bookings: BookingService::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                ledger.clone(),
                dispatcher.clone(),
                settings.default_session_minutes,
            ),
            refunds: RefundEngine::new(
                Arc::clone(&store),
                Arc::clone(&clock),
                ledger.clone(),
                dispatcher.clone(),
                settings.refund_policy,
            ),
            scheduler: SessionScheduler::new(
                Arc::clone(&store),
                clock,
                dispatcher,
                settings.scheduler,
            ),
            ledger,
            store,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Check that the store accepts transactions.
    pub async fn health(&self) -> HealthCheck {
        match self.store.begin().await {
            Ok(tx) => match tx.rollback().await {
                Ok(()) => HealthCheck::healthy("store"),
                Err(error) => HealthCheck::unhealthy("store", error.to_string()),
            },
            Err(error) => HealthCheck::unhealthy("store", error.to_string()),
        }
    }
}

//! # Tutoring Testing
//!
//! Test doubles for the tutoring booking core.
//!
//! This crate provides:
//! - [`InMemoryStore`]: a transactional store held in memory
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Notifiers that record or fail deliveries
//! - Fixtures for seeding users and slots
//!
//! ## Example
//!
//! ```ignore
//! use tutoring_testing::{InMemoryStore, ManualClock, RecordingNotifier, fixtures};
//!
//! #[tokio::test]
//! async fn test_booking_flow() {
//!     let store = Arc::new(InMemoryStore::new());
//!     let teacher = fixtures::seed_user(store.as_ref(), "Grace").await?;
//!     let slot = fixtures::seed_slot(store.as_ref(), teacher.id, starts_at, 100).await?;
//!     // build services over `store` and exercise them
//! }
//! ```

mod store;

pub use store::InMemoryStore;

use chrono::{DateTime, Utc};
use tutoring_core::Clock;

/// Mock implementations of the injected collaborators.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tutoring_core::{Notification, Notifier, NotifyError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tutoring_testing::mocks::FixedClock;
    /// use tutoring_core::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward (or back, with a negative duration).
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Notifier that keeps everything it is handed.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        signal: Notify,
    }

    impl RecordingNotifier {
        /// Creates an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything delivered so far.
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Wait until at least `count` notifications arrived, or five seconds
        /// passed. Returns whatever was delivered.
        ///
        /// Dispatch is spawned, so tests await this instead of reading
        /// [`RecordingNotifier::sent`] right after the operation returns.
        pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                let notified = self.signal.notified();
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.sent();
                }
            }
        }

        fn record(&self, notification: Notification) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification);
            self.signal.notify_waiters();
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
            self.record(notification);
            Ok(())
        }
    }

    /// Notifier that fails a set number of times before delivering.
    #[derive(Debug)]
    pub struct FailingNotifier {
        error: NotifyError,
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        delivered: RecordingNotifier,
    }

    impl FailingNotifier {
        /// Fail every delivery with `error`.
        #[must_use]
        pub fn always(error: NotifyError) -> Self {
            Self::times(usize::MAX, error)
        }

        /// Fail the first `failures` deliveries with `error`.
        #[must_use]
        pub fn times(failures: usize, error: NotifyError) -> Self {
            Self {
                error,
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                delivered: RecordingNotifier::new(),
            }
        }

        /// Calls to `send`, failed or not.
        #[must_use]
        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Notifications that got through.
        #[must_use]
        pub const fn delivered(&self) -> &RecordingNotifier {
            &self.delivered
        }
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(self.error.clone());
            }
            self.delivered.record(notification);
            Ok(())
        }
    }
}

/// Seeding helpers.
pub mod fixtures {
    use chrono::{DateTime, Duration, Utc};
    use tutoring_core::{Credits, NewSlot, Result, Slot, Store, User, UserId};

    /// Insert a user with an empty balance.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn seed_user(store: &dyn Store, name: &str) -> Result<User> {
        let user = User::new(UserId::new(), name.to_string());
        let mut tx = store.begin().await?;
        tx.insert_user(&user).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Insert a one-hour slot starting at `starts_at`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the hour crosses midnight.
    pub async fn seed_slot(
        store: &dyn Store,
        teacher_id: UserId,
        starts_at: DateTime<Utc>,
        price: i64,
    ) -> Result<Slot> {
        let slot = Slot::publish(NewSlot {
            teacher_id,
            date: starts_at.date_naive(),
            start_time: starts_at.time(),
            end_time: starts_at.time() + Duration::hours(1),
            price: Credits::new(price),
        })?;
        let mut tx = store.begin().await?;
        tx.insert_slot(&slot).await?;
        tx.commit().await?;
        Ok(slot)
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{
    FailingNotifier, FixedClock, ManualClock, RecordingNotifier, test_clock, test_epoch,
};

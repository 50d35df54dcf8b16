//! Shared fixtures for runtime integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tutoring_core::{Credits, Slot, User, UserId};
use tutoring_runtime::{RetryPolicy, Services, Settings};
use tutoring_testing::{InMemoryStore, ManualClock, RecordingNotifier, fixtures, test_epoch};

// ============================================================================
// Test Fixtures
// ============================================================================

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub services: Services,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(Settings {
            notify_retry: RetryPolicy::none(),
            ..Settings::default()
        })
    }

    pub fn with_settings(settings: Settings) -> Self {
        tutoring_testing::init_tracing();
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let notifier = Arc::new(RecordingNotifier::new());
        let services = Services::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
            settings,
        );
        Self {
            store,
            clock,
            notifier,
            services,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use tutoring_core::Clock;
        self.clock.now()
    }

    /// Seed a user and fund them through the ledger.
    pub async fn student(&self, credits: i64) -> User {
        let user = fixtures::seed_user(self.store.as_ref(), "student")
            .await
            .unwrap();
        if credits > 0 {
            self.services
                .ledger
                .add_credits(user.id, Credits::new(credits), "Top-up", None)
                .await
                .unwrap();
        }
        user
    }

    pub async fn teacher(&self) -> User {
        fixtures::seed_user(self.store.as_ref(), "teacher")
            .await
            .unwrap()
    }

    /// A one-hour slot starting `hours` from the current clock.
    pub async fn slot_in(&self, teacher: UserId, hours: i64, price: i64) -> Slot {
        fixtures::seed_slot(
            self.store.as_ref(),
            teacher,
            self.now() + Duration::hours(hours),
            price,
        )
        .await
        .unwrap()
    }

    pub async fn balance(&self, user: UserId) -> i64 {
        self.store.user(user).await.unwrap().credit_balance.amount()
    }

    pub async fn escrow_held(&self) -> i64 {
        self.services.ledger.escrow_held().await.unwrap().amount()
    }
}

//! Notification delivery never decides the outcome of a money movement.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::Duration;
use std::sync::Arc;
use tutoring_core::{Notification, NotifyError, UserId};
use tutoring_runtime::{Dispatcher, RetryPolicy, Services, Settings};
use tutoring_testing::{FailingNotifier, InMemoryStore, ManualClock, fixtures, test_epoch};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(std::time::Duration::from_millis(1))
        .max_delay(std::time::Duration::from_millis(5))
        .jitter(false)
        .build()
}

#[tokio::test]
async fn booking_succeeds_while_notifications_fail() {
    let store = Arc::new(InMemoryStore::new());
    let notifier = Arc::new(FailingNotifier::always(NotifyError::Rejected(
        "no device".into(),
    )));
    let services = Services::new(
        store.clone(),
        Arc::new(ManualClock::new(test_epoch())),
        notifier.clone(),
        Settings {
            notify_retry: fast_retry(3),
            ..Settings::default()
        },
    );
    let teacher = fixtures::seed_user(store.as_ref(), "teacher").await.unwrap();
    let student = fixtures::seed_user(store.as_ref(), "student").await.unwrap();
    services
        .ledger
        .add_credits(student.id, tutoring_core::Credits::new(100), "Top-up", None)
        .await
        .unwrap();
    let slot = fixtures::seed_slot(
        store.as_ref(),
        teacher.id,
        test_epoch() + Duration::hours(30),
        100,
    )
    .await
    .unwrap();

    let receipt = services.bookings.create(student.id, slot.id, None).await.unwrap();
    services
        .refunds
        .cancel(receipt.booking.id, student.id, None)
        .await
        .unwrap();

    assert_eq!(store.user(student.id).await.unwrap().credit_balance.amount(), 100);

    // rejected deliveries are not retried: 2 on booking + 2 on cancellation
    for _ in 0..100 {
        if notifier.attempts() >= 4 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(notifier.attempts(), 4);
    assert!(notifier.delivered().sent().is_empty());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let notifier = Arc::new(FailingNotifier::times(
        2,
        NotifyError::Unavailable("timeout".into()),
    ));
    let dispatcher = Dispatcher::new(notifier.clone(), fast_retry(3));

    let delivered = dispatcher
        .deliver(Notification::new(UserId::new(), "Hello", "World"))
        .await;

    assert!(delivered);
    assert_eq!(notifier.attempts(), 3);
    assert_eq!(notifier.delivered().sent().len(), 1);
}

#[tokio::test]
async fn exhausted_retries_drop_the_notification() {
    let notifier = Arc::new(FailingNotifier::always(NotifyError::Unavailable(
        "down".into(),
    )));
    let dispatcher = Dispatcher::new(notifier.clone(), fast_retry(2));

    let delivered = dispatcher
        .deliver(Notification::new(UserId::new(), "Hello", "World"))
        .await;

    assert!(!delivered);
    assert_eq!(notifier.attempts(), 3);
}

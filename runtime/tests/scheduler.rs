//! Session lifecycle scheduler: sweeps, grace windows, overrides and the run loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use chrono::Duration;
use common::Harness;
use std::sync::Arc;
use tokio::sync::broadcast;
use tutoring_core::{BookingStatus, Error, SessionStatus};
use tutoring_runtime::{BookingReceipt, RetryPolicy, SchedulerConfig, Settings, Transition};

async fn booked(h: &Harness, hours: i64) -> BookingReceipt {
    let teacher = h.teacher().await;
    let student = h.student(100).await;
    let slot = h.slot_in(teacher.id, hours, 100).await;
    h.services
        .bookings
        .create(student.id, slot.id, None)
        .await
        .unwrap()
}

// ============================================================================
// Open sweep
// ============================================================================

#[tokio::test]
async fn open_sweep_opens_started_sessions_once() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    h.notifier.wait_for(2).await;
    h.clock.set(receipt.session.scheduled_at + Duration::minutes(3));

    let report = h.services.scheduler.open_sweep().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.transitioned, 1);
    assert_eq!(report.failed, 0);

    let session = h.store.session(receipt.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Live);
    assert!(session.auto_opened);
    assert_eq!(session.opened_at, Some(h.now()));

    let sent = h.notifier.wait_for(4).await;
    let live: Vec<_> = sent.iter().filter(|n| n.title == "Session is live").collect();
    assert_eq!(live.len(), 2);

    // already live: nothing selected, nothing sent
    let again = h.services.scheduler.open_sweep().await.unwrap();
    assert_eq!(again.examined, 0);
    let forced = h.services.scheduler.force_open(receipt.session.id).await.unwrap();
    assert!(!forced.is_applied());
    assert_eq!(forced.session().status, SessionStatus::Live);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(h.notifier.sent().len(), 4);
}

#[tokio::test]
async fn open_sweep_respects_the_grace_window() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    let start = receipt.session.scheduled_at;

    h.clock.set(start - Duration::minutes(1));
    assert_eq!(h.services.scheduler.open_sweep().await.unwrap().examined, 0);

    h.clock.set(start);
    h.clock.advance(Duration::minutes(11));
    assert_eq!(h.services.scheduler.open_sweep().await.unwrap().examined, 0);

    h.clock.set(start + Duration::minutes(10));
    assert_eq!(h.services.scheduler.open_sweep().await.unwrap().transitioned, 1);
}

// ============================================================================
// Close sweep
// ============================================================================

#[tokio::test]
async fn close_sweep_waits_for_grace_then_completes_bookings() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    let end = receipt.session.ends_at();

    h.clock.set(end + Duration::minutes(4));
    assert_eq!(h.services.scheduler.close_sweep().await.unwrap().examined, 0);

    h.clock.set(end + Duration::minutes(5));
    let report = h.services.scheduler.close_sweep().await.unwrap();
    assert_eq!(report.transitioned, 1);

    let session = h.store.session(receipt.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert!(session.auto_closed);
    assert_eq!(session.closed_at, Some(h.now()));

    let booking = h.services.bookings.get(receipt.booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
    assert_eq!(booking.completed_at, Some(h.now()));

    // completed bookings cannot be cancelled
    let err = h
        .services
        .refunds
        .cancel(receipt.booking.id, receipt.booking.student_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(h.escrow_held().await, 100);
}

#[tokio::test]
async fn close_sweep_closes_sessions_that_never_opened() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    h.clock.set(receipt.session.ends_at() + Duration::hours(1));

    let report = h.services.scheduler.close_sweep().await.unwrap();

    assert_eq!(report.transitioned, 1);
    let session = h.store.session(receipt.session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert_eq!(session.opened_at, None);
}

#[tokio::test]
async fn cancelled_sessions_are_never_swept() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    h.services
        .refunds
        .cancel(receipt.booking.id, receipt.booking.student_id, None)
        .await
        .unwrap();

    h.clock.set(receipt.session.scheduled_at);
    assert_eq!(h.services.scheduler.open_sweep().await.unwrap().examined, 0);
    h.clock.set(receipt.session.ends_at() + Duration::hours(1));
    assert_eq!(h.services.scheduler.close_sweep().await.unwrap().examined, 0);

    let err = h
        .services
        .scheduler
        .force_open(receipt.session.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

// ============================================================================
// Operator overrides
// ============================================================================

#[tokio::test]
async fn force_close_is_manual_and_idempotent() {
    let h = Harness::new();
    let receipt = booked(&h, 30).await;

    let first = h.services.scheduler.force_close(receipt.session.id).await.unwrap();
    let Transition::Applied(session) = first else {
        panic!("expected the first close to apply");
    };
    assert_eq!(session.status, SessionStatus::Ended);
    assert!(!session.auto_closed);

    let second = h.services.scheduler.force_close(receipt.session.id).await.unwrap();
    assert!(!second.is_applied());

    let booking = h.services.bookings.get(receipt.booking.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Completed);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let h = Harness::new();
    let err = h
        .services
        .scheduler
        .force_open(tutoring_core::SessionId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "session", .. }), "got {err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_apply_exactly_once() {
    let h = Harness::new();
    let receipt = booked(&h, 2).await;
    h.clock.set(receipt.session.scheduled_at);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let scheduler = h.services.scheduler.clone();
        let id = receipt.session.id;
        tasks.spawn(async move { scheduler.force_open(id).await });
    }
    let mut applied = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().unwrap().is_applied() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
}

// ============================================================================
// Run loop
// ============================================================================

#[tokio::test]
async fn run_loop_sweeps_until_shutdown() {
    let h = Arc::new(Harness::with_settings(Settings {
        scheduler: SchedulerConfig {
            interval: std::time::Duration::from_millis(10),
            ..SchedulerConfig::default()
        },
        notify_retry: RetryPolicy::none(),
        ..Settings::default()
    }));
    let receipt = booked(&h, 2).await;
    h.clock.set(receipt.session.ends_at() + Duration::minutes(30));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = h.services.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let mut ended = false;
    for _ in 0..100 {
        let status = h.store.session(receipt.session.id).await.unwrap().status;
        if status == SessionStatus::Ended {
            ended = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(ended, "scheduler never closed the session");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
}

#[tokio::test]
async fn tick_runs_both_sweeps() {
    let h = Harness::new();
    let due_to_open = booked(&h, 2).await;
    let due_to_close = booked(&h, 1).await;
    // 02:05 opens the first session and closes the second (01:00 + 60m + 5m)
    h.clock.set(due_to_open.session.scheduled_at + Duration::minutes(5));

    h.services.scheduler.tick().await;

    let opened = h.store.session(due_to_open.session.id).await.unwrap();
    let closed = h.store.session(due_to_close.session.id).await.unwrap();
    assert_eq!(opened.status, SessionStatus::Live);
    assert_eq!(closed.status, SessionStatus::Ended);
}

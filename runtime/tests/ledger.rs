//! Ledger service: postings, revenue sharing, slot registry and balance laws.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

mod common;

use chrono::{Duration, NaiveTime};
use common::Harness;
use proptest::prelude::*;
use tutoring_core::{
    Account, Caller, Credits, EntrySpec, EntryType, Error, NewSlot, PostingRequest, Role,
    TransactionType, UserId,
};

// ============================================================================
// Postings
// ============================================================================

#[tokio::test]
async fn unbalanced_posting_is_rejected_without_writes() {
    let h = Harness::new();
    let student = h.student(100).await;
    let request = PostingRequest::new(
        vec![
            EntrySpec::debit(Account::User(student.id), Credits::new(30), "out"),
            EntrySpec::credit(Account::Escrow, Credits::new(20), "in"),
        ]
        .into(),
        "broken",
        TransactionType::Transfer,
    );

    let err = h.services.ledger.post(request).await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(h.store.transaction_count().await, 1);
    assert_eq!(h.balance(student.id).await, 100);
}

#[tokio::test]
async fn deduct_rejects_overdraft() {
    let h = Harness::new();
    let student = h.student(40).await;

    let err = h
        .services
        .ledger
        .deduct(student.id, Credits::new(50), "too much", None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::InsufficientFunds {
            required: Credits::new(50),
            available: Credits::new(40),
        }
    );
}

#[tokio::test]
async fn direct_transfer_cannot_overdraw_a_wallet() {
    let h = Harness::new();
    let payer = h.student(10).await;
    let payee = h.student(0).await;

    let err = h
        .services
        .ledger
        .post(PostingRequest::transfer(
            Account::User(payer.id),
            Account::User(payee.id),
            Credits::new(25),
            "gift",
        ))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        Error::InsufficientFunds {
            required: Credits::new(25),
            available: Credits::new(10),
        }
    );
    assert_eq!(h.balance(payee.id).await, 0);
}

#[tokio::test]
async fn add_credits_to_unknown_user_is_not_found() {
    let h = Harness::new();
    let err = h
        .services
        .ledger
        .add_credits(UserId::new(), Credits::new(10), "Top-up", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "user", .. }), "got {err:?}");
}

#[tokio::test]
async fn entries_record_running_balances() {
    let h = Harness::new();
    let student = h.student(100).await;
    h.services
        .ledger
        .deduct(student.id, Credits::new(30), "Lesson", Some("ref-1"))
        .await
        .unwrap();

    let entries = h
        .services
        .ledger
        .entries_for(&Account::User(student.id))
        .await
        .unwrap();

    let trail: Vec<(EntryType, i64, i64)> = entries
        .iter()
        .map(|e| (e.entry_type, e.amount.amount(), e.balance_after.amount()))
        .collect();
    assert_eq!(
        trail,
        vec![(EntryType::Credit, 100, 100), (EntryType::Debit, 30, 70)]
    );
}

#[tokio::test]
async fn revenue_share_releases_escrow_to_teacher_and_platform() {
    let h = Harness::new();
    let teacher = h.teacher().await;
    let student = h.student(100).await;
    let slot = h.slot_in(teacher.id, 30, 100).await;
    let receipt = h
        .services
        .bookings
        .create(student.id, slot.id, None)
        .await
        .unwrap();

    let reference = receipt.booking.id.to_string();
    let posting = h
        .services
        .ledger
        .share_revenue(teacher.id, Credits::new(100), 20, "Payout", Some(&reference))
        .await
        .unwrap();

    assert_eq!(posting.transaction.transaction_type, TransactionType::RevenueSharing);
    assert_eq!(h.balance(teacher.id).await, 80);
    assert_eq!(h.escrow_held().await, 0);
    for account in [Account::User(teacher.id), Account::Escrow, Account::Platform] {
        h.services.ledger.verify_account(&account).await.unwrap();
    }
}

#[tokio::test]
async fn revenue_share_rejects_bad_percent() {
    let h = Harness::new();
    let teacher = h.teacher().await;
    let err = h
        .services
        .ledger
        .share_revenue(teacher.id, Credits::new(100), 101, "Payout", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

// ============================================================================
// Slot registry
// ============================================================================

fn new_slot(teacher_id: UserId, price: i64) -> NewSlot {
    NewSlot {
        teacher_id,
        date: (tutoring_testing::test_epoch() + Duration::days(2)).date_naive(),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(9, 45, 0).unwrap(),
        price: Credits::new(price),
    }
}

#[tokio::test]
async fn teachers_publish_and_withdraw_their_slots() {
    let h = Harness::new();
    let teacher = h.teacher().await;
    let caller = Caller {
        id: teacher.id,
        role: Role::Teacher,
    };

    let slot = h
        .services
        .slots
        .publish(caller, new_slot(teacher.id, 40))
        .await
        .unwrap();
    assert!(!slot.is_booked);
    assert_eq!(h.services.slots.get(slot.id).await.unwrap(), slot);

    h.services.slots.withdraw(caller, slot.id).await.unwrap();
    let err = h.services.slots.get(slot.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");
}

#[tokio::test]
async fn publishing_for_someone_else_is_forbidden() {
    let h = Harness::new();
    let teacher = h.teacher().await;
    let student = h.student(0).await;

    let as_student = Caller {
        id: student.id,
        role: Role::Student,
    };
    let err = h
        .services
        .slots
        .publish(as_student, new_slot(teacher.id, 40))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "got {err:?}");

    let other_teacher = Caller {
        id: UserId::new(),
        role: Role::Teacher,
    };
    let err = h
        .services
        .slots
        .publish(other_teacher, new_slot(teacher.id, 40))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)), "got {err:?}");
}

#[tokio::test]
async fn booked_slot_cannot_be_withdrawn() {
    let h = Harness::new();
    let teacher = h.teacher().await;
    let student = h.student(100).await;
    let slot = h.slot_in(teacher.id, 30, 100).await;
    h.services
        .bookings
        .create(student.id, slot.id, None)
        .await
        .unwrap();

    let caller = Caller {
        id: teacher.id,
        role: Role::Teacher,
    };
    let err = h.services.slots.withdraw(caller, slot.id).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn store_reports_healthy() {
    let h = Harness::new();
    assert!(h.services.health().await.status.is_healthy());
}

// ============================================================================
// Balance law
// ============================================================================

#[derive(Clone, Debug)]
enum Op {
    TopUp(i64),
    Spend(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..500).prop_map(Op::TopUp),
        (1i64..500).prop_map(Op::Spend),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn wallet_equals_replayed_ledger_and_never_goes_negative(ops in prop::collection::vec(op(), 1..20)) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let student = h.student(0).await;
            let mut expected = 0i64;
            let mut spent = 0i64;

            for op in ops {
                match op {
                    Op::TopUp(amount) => {
                        h.services
                            .ledger
                            .add_credits(student.id, Credits::new(amount), "Top-up", None)
                            .await
                            .unwrap();
                        expected += amount;
                    }
                    Op::Spend(amount) => {
                        let result = h
                            .services
                            .ledger
                            .deduct(student.id, Credits::new(amount), "Spend", None)
                            .await;
                        if amount <= expected {
                            result.unwrap();
                            expected -= amount;
                            spent += amount;
                        } else {
                            assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
                        }
                    }
                }
                assert!(h.balance(student.id).await >= 0);
            }

            let replayed = h
                .services
                .ledger
                .verify_account(&Account::User(student.id))
                .await
                .unwrap();
            assert_eq!(replayed.amount(), expected);
            assert_eq!(h.escrow_held().await, spent);
            h.services.ledger.verify_account(&Account::Escrow).await.unwrap();
        });
    }
}

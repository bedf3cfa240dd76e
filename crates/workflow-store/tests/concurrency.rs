//! Concurrent access to the in-memory workflow store.

use common::{CourseId, TransactionId, UserId};
use domain::{Money, NewTransaction, SagaStep};
use futures_util::future::join_all;
use workflow_store::{EnrollmentStore, IdempotencyLedger, InMemoryStore, StoreError};

fn new_tx(id: &str) -> NewTransaction {
    NewTransaction {
        transaction_id: TransactionId::new(id),
        user_id: UserId::new("u1"),
        course_id: CourseId::new("c1"),
        course_code: "CS101".to_string(),
        amount: Money::from_cents(4999),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_begin_creates_one_entry() {
    let store = InMemoryStore::new();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.begin(new_tx("tx-1")).await.unwrap() })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_new).count(), 1);
    assert_eq!(store.transaction_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_advance_has_exactly_one_winner() {
    let store = InMemoryStore::new();
    store.begin(new_tx("tx-1")).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .advance(
                        &TransactionId::new("tx-1"),
                        SagaStep::Pending,
                        SagaStep::PaymentRecorded,
                    )
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(StoreError::StepConflict { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);

    let tx = store.get(&TransactionId::new("tx-1")).await.unwrap().unwrap();
    assert_eq!(tx.current_step, SagaStep::PaymentRecorded);
    assert_eq!(tx.history.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_create_enrollment_yields_one_record() {
    let store = InMemoryStore::new();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_enrollment(&UserId::new("u1"), &CourseId::new("c1"), "CS101")
                    .await
                    .unwrap()
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.created).count(), 1);
    assert_eq!(store.enrollment_count().await, 1);
    let first = &results[0].record;
    assert!(results.iter().all(|r| r.record.created_at == first.created_at));
}

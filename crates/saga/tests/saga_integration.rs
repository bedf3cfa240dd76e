//! Integration tests for the enrollment saga.

use std::sync::Arc;
use std::time::Duration;

use common::{CourseId, TransactionId};
use domain::{Money, PaymentConfirmation, SagaStep};
use futures_util::future::join_all;
use saga::{
    Channel, InMemoryNotificationTransport, InMemoryPaymentVerifier, InMemoryUserDirectory,
    RetryPolicy, SagaError, SagaOrchestrator, UserDirectory, UserProfile,
};
use workflow_store::{EnrollmentStore, IdempotencyLedger, InMemoryStore, PaymentStore};

type TestOrchestrator = SagaOrchestrator<
    InMemoryStore,
    InMemoryPaymentVerifier,
    InMemoryUserDirectory,
    InMemoryNotificationTransport,
>;

struct TestHarness {
    orchestrator: Arc<TestOrchestrator>,
    store: InMemoryStore,
    verifier: InMemoryPaymentVerifier,
    directory: InMemoryUserDirectory,
    transport: InMemoryNotificationTransport,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_verifier(InMemoryPaymentVerifier::permissive())
    }

    fn with_verifier(verifier: InMemoryPaymentVerifier) -> Self {
        let store = InMemoryStore::new();
        let directory = InMemoryUserDirectory::new();
        directory.add_user(
            UserProfile::new("u1", "Ada Lovelace")
                .with_email("ada@example.com")
                .with_phone("+15550100"),
        );
        let transport = InMemoryNotificationTransport::new();

        let orchestrator = SagaOrchestrator::new(
            store.clone(),
            verifier.clone(),
            directory.clone(),
            transport.clone(),
        )
        .with_policy(RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2,
            step_timeout: Duration::from_millis(500),
        });

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            verifier,
            directory,
            transport,
        }
    }

    fn confirmation(&self, id: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            payment_transaction_id: id.into(),
            user_id: "u1".into(),
            course_id: "c1".into(),
            course_code: "CS101".to_string(),
            amount: 49.99,
        }
    }

    async fn admit_and_process(&self, id: &str) -> domain::SagaTransaction {
        self.orchestrator
            .admit(self.confirmation(id))
            .await
            .unwrap();
        self.orchestrator.process(&id.into()).await.unwrap()
    }
}

fn steps_of(tx: &domain::SagaTransaction) -> Vec<SagaStep> {
    tx.history.iter().map(|t| t.to).collect()
}

#[tokio::test]
async fn test_happy_path_enrollment() {
    let h = TestHarness::new();

    let done = h.admit_and_process("tx-1").await;

    assert_eq!(done.current_step, SagaStep::Complete);
    assert_eq!(done.amount, Money::from_cents(4999));
    assert_eq!(
        steps_of(&done),
        vec![
            SagaStep::PaymentRecorded,
            SagaStep::AccessGranted,
            SagaStep::EnrollmentConfirmed,
            SagaStep::Complete,
        ]
    );

    let payment = h.store.get_payment(&"tx-1".into()).await.unwrap().unwrap();
    assert_eq!(payment.amount, Money::from_cents(4999));
    assert_eq!(h.directory.enrolled_courses(&"u1".into()), vec![CourseId::from("c1")]);

    let enrollments = h.store.list_enrollments(&"u1".into()).await.unwrap();
    assert_eq!(enrollments.len(), 1);
    assert_eq!(enrollments[0].progress_percentage.value(), 0);

    assert_eq!(h.transport.sent_on(Channel::Email).len(), 1);
    assert_eq!(h.transport.sent_on(Channel::Sms).len(), 1);
}

#[tokio::test]
async fn test_replayed_confirmation_is_idempotent() {
    let h = TestHarness::new();
    h.admit_and_process("tx-1").await;

    let replay = h.orchestrator.admit(h.confirmation("tx-1")).await.unwrap();
    assert!(!replay.is_new);
    assert_eq!(replay.transaction.current_step, SagaStep::Complete);

    let again = h.orchestrator.process(&"tx-1".into()).await.unwrap();
    assert_eq!(again.current_step, SagaStep::Complete);

    assert_eq!(h.store.transaction_count().await, 1);
    assert_eq!(h.store.payment_count().await, 1);
    assert_eq!(h.store.enrollment_count().await, 1);
    assert_eq!(h.directory.grant_count(), 1);
    assert_eq!(h.transport.sent().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_yield_one_effect_each() {
    let h = TestHarness::new();

    let admissions = join_all((0..8).map(|_| {
        let orchestrator = h.orchestrator.clone();
        let confirmation = h.confirmation("tx-1");
        tokio::spawn(async move { orchestrator.admit(confirmation).await })
    }))
    .await;
    let new_count = admissions
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|a| a.is_new)
        .count();
    assert_eq!(new_count, 1);

    let runs = join_all((0..8).map(|_| {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.process(&TransactionId::from("tx-1")).await })
    }))
    .await;
    for run in runs {
        run.unwrap().unwrap();
    }

    let tx = h.store.get(&"tx-1".into()).await.unwrap().unwrap();
    assert_eq!(tx.current_step, SagaStep::Complete);
    assert_eq!(tx.history.len(), 4);
    assert_eq!(h.store.payment_count().await, 1);
    assert_eq!(h.store.enrollment_count().await, 1);
    assert_eq!(h.directory.enrolled_courses(&"u1".into()).len(), 1);
    // Notifications go out only from the instance that completed the saga.
    assert_eq!(h.transport.sent_on(Channel::Email).len(), 1);
}

#[tokio::test]
async fn test_resume_after_crash_skips_finished_steps() {
    let h = TestHarness::new();
    h.orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap();
    let id = TransactionId::from("tx-1");

    // Simulate a crash after access was granted and recorded.
    h.store
        .record_payment(&id, &"u1".into(), &"c1".into(), Money::from_cents(4999))
        .await
        .unwrap();
    h.store
        .advance(&id, SagaStep::Pending, SagaStep::PaymentRecorded)
        .await
        .unwrap();
    h.directory
        .grant_access(&"u1".into(), &"c1".into())
        .await
        .unwrap();
    h.store
        .advance(&id, SagaStep::PaymentRecorded, SagaStep::AccessGranted)
        .await
        .unwrap();
    let grants_before = h.directory.grant_count();

    let report = h.orchestrator.resume_unfinished(10).await.unwrap();

    assert_eq!(report.resumed, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(h.directory.grant_count(), grants_before);
    let tx = h.store.get(&id).await.unwrap().unwrap();
    assert_eq!(tx.current_step, SagaStep::Complete);
    assert_eq!(h.store.enrollment_count().await, 1);
}

#[tokio::test]
async fn test_crash_between_effect_and_advance_does_not_duplicate() {
    let h = TestHarness::new();
    h.orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap();
    let id = TransactionId::from("tx-1");

    // The payment was written but the ledger never advanced.
    h.store
        .record_payment(&id, &"u1".into(), &"c1".into(), Money::from_cents(4999))
        .await
        .unwrap();

    let done = h.orchestrator.process(&id).await.unwrap();

    assert_eq!(done.current_step, SagaStep::Complete);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = TestHarness::new();
    h.directory.fail_next_grants(2);

    let done = h.admit_and_process("tx-1").await;

    assert_eq!(done.current_step, SagaStep::Complete);
    assert_eq!(h.directory.grant_count(), 3);
    assert_eq!(done.attempt_count, 0);
}

#[tokio::test]
async fn test_exhausted_retries_mark_failed() {
    let h = TestHarness::new();
    h.store.fail_next_enrollment_writes(10);

    let done = h.admit_and_process("tx-1").await;

    assert_eq!(done.current_step, SagaStep::Failed);
    assert!(done.last_error.as_deref().unwrap().contains("confirm_enrollment"));
    assert_eq!(h.store.enrollment_count().await, 0);
    // Earlier effects stay in place; there is no compensation.
    assert_eq!(h.store.payment_count().await, 1);
    assert_eq!(h.directory.enrolled_courses(&"u1".into()).len(), 1);
    assert!(h.transport.sent().is_empty());

    let failed = h.orchestrator.list_failed(10).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].transaction_id, TransactionId::from("tx-1"));
}

#[tokio::test]
async fn test_unknown_user_fails_without_retry() {
    let h = TestHarness::new();
    let mut confirmation = h.confirmation("tx-1");
    confirmation.user_id = "ghost".into();
    h.orchestrator.admit(confirmation).await.unwrap();

    let done = h.orchestrator.process(&"tx-1".into()).await.unwrap();

    assert_eq!(done.current_step, SagaStep::Failed);
    assert_eq!(h.directory.grant_count(), 1);
    assert_eq!(h.store.enrollment_count().await, 0);
}

#[tokio::test]
async fn test_failed_transaction_is_not_reprocessed() {
    let h = TestHarness::new();
    h.directory.fail_next_grants(10);
    let failed = h.admit_and_process("tx-1").await;
    assert_eq!(failed.current_step, SagaStep::Failed);
    let grants = h.directory.grant_count();

    let again = h.orchestrator.process(&"tx-1".into()).await.unwrap();
    let report = h.orchestrator.resume_unfinished(10).await.unwrap();

    assert_eq!(again.current_step, SagaStep::Failed);
    assert_eq!(report.resumed, 0);
    assert_eq!(h.directory.grant_count(), grants);
}

#[tokio::test]
async fn test_amount_mismatch_is_rejected() {
    let verifier = InMemoryPaymentVerifier::new();
    verifier.register_capture("tx-1", Money::from_cents(1000));
    let h = TestHarness::with_verifier(verifier);

    let err = h
        .orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::AmountMismatch { .. }));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_unverified_capture_is_rejected() {
    let h = TestHarness::with_verifier(InMemoryPaymentVerifier::new());

    let err = h
        .orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::PaymentNotVerified(_)));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_replay_does_not_reverify() {
    let verifier = InMemoryPaymentVerifier::new();
    verifier.register_capture("tx-1", Money::from_cents(4999));
    let h = TestHarness::with_verifier(verifier);

    h.orchestrator.admit(h.confirmation("tx-1")).await.unwrap();
    h.verifier.set_unavailable(true);
    let replay = h.orchestrator.admit(h.confirmation("tx-1")).await.unwrap();

    assert!(!replay.is_new);
    assert_eq!(h.verifier.call_count(), 1);
}

#[tokio::test]
async fn test_notification_failure_leaves_complete() {
    let h = TestHarness::new();
    h.transport.set_fail_on_send(true);

    let done = h.admit_and_process("tx-1").await;

    assert_eq!(done.current_step, SagaStep::Complete);
    assert!(h.transport.sent().is_empty());
    assert_eq!(h.transport.attempt_count(), 2);
}

#[tokio::test]
async fn test_ledger_outage_is_resumable() {
    let h = TestHarness::new();
    h.orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap();
    h.store.fail_next_ledger_writes(1);

    let err = h.orchestrator.process(&"tx-1".into()).await.unwrap_err();
    assert!(matches!(err, SagaError::Store(_)));
    let stuck = h.store.get(&"tx-1".into()).await.unwrap().unwrap();
    assert_eq!(stuck.current_step, SagaStep::Pending);

    let report = h.orchestrator.resume_unfinished(10).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_retry_budget_survives_restart() {
    let h = TestHarness::new();
    h.orchestrator
        .admit(h.confirmation("tx-1"))
        .await
        .unwrap();
    let id = TransactionId::from("tx-1");
    h.store
        .record_attempt(&id, SagaStep::Pending, "store unavailable")
        .await
        .unwrap();
    h.store
        .record_attempt(&id, SagaStep::Pending, "store unavailable")
        .await
        .unwrap();
    h.store.fail_next_payment_writes(1);

    let done = h.orchestrator.process(&id).await.unwrap();

    assert_eq!(done.current_step, SagaStep::Failed);
    assert_eq!(h.store.payment_count().await, 0);
}

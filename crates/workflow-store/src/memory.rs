use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{CourseId, TransactionId, UserId};
use domain::{
    EnrollmentRecord, Money, NewTransaction, PaymentRecord, Progress, SagaStep, SagaTransaction,
};
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{
        BeginResult, EnrollmentStore, IdempotencyLedger, PaymentStore, UpsertResult,
        validate_transition,
    },
};

#[derive(Debug, Default)]
struct Faults {
    ledger_writes: AtomicU32,
    payment_writes: AtomicU32,
    enrollment_writes: AtomicU32,
}

impl Faults {
    /// Consumes one injected failure from `counter`, if any remain.
    fn trip(counter: &AtomicU32, what: &str) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable(format!("{what} store unavailable")))
        } else {
            Ok(())
        }
    }
}

/// In-memory workflow store for tests and local development.
///
/// Each map is guarded by its own lock, held only for the duration of a single
/// operation. Fault injection makes the next `n` writes of a kind fail with
/// [`StoreError::Unavailable`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    transactions: Arc<RwLock<HashMap<TransactionId, SagaTransaction>>>,
    payments: Arc<RwLock<HashMap<TransactionId, PaymentRecord>>>,
    enrollments: Arc<RwLock<HashMap<(UserId, CourseId), EnrollmentRecord>>>,
    faults: Arc<Faults>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` ledger writes fail as unavailable.
    pub fn fail_next_ledger_writes(&self, n: u32) {
        self.faults.ledger_writes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` payment writes fail as unavailable.
    pub fn fail_next_payment_writes(&self, n: u32) {
        self.faults.payment_writes.store(n, Ordering::SeqCst);
    }

    /// Makes the next `n` enrollment writes fail as unavailable.
    pub fn fail_next_enrollment_writes(&self, n: u32) {
        self.faults.enrollment_writes.store(n, Ordering::SeqCst);
    }

    /// Returns the number of ledger entries.
    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    /// Returns the number of recorded payments.
    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }

    /// Returns the number of enrollment records.
    pub async fn enrollment_count(&self) -> usize {
        self.enrollments.read().await.len()
    }

    /// Applies `mutate` to a transaction whose step still equals `expected`.
    async fn compare_and_set(
        &self,
        transaction_id: &TransactionId,
        expected: SagaStep,
        mutate: impl FnOnce(&mut SagaTransaction) + Send,
    ) -> Result<SagaTransaction> {
        Faults::trip(&self.faults.ledger_writes, "ledger")?;

        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.clone()))?;

        if tx.current_step != expected {
            return Err(StoreError::StepConflict {
                transaction_id: transaction_id.clone(),
                expected,
                actual: tx.current_step,
            });
        }

        mutate(tx);
        Ok(tx.clone())
    }

    async fn list_where(
        &self,
        limit: usize,
        predicate: impl Fn(&SagaTransaction) -> bool + Send,
    ) -> Vec<SagaTransaction> {
        let transactions = self.transactions.read().await;
        let mut matching: Vec<_> = transactions
            .values()
            .filter(|tx| predicate(tx))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        matching.truncate(limit);
        matching
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryStore {
    async fn begin(&self, new: NewTransaction) -> Result<BeginResult> {
        Faults::trip(&self.faults.ledger_writes, "ledger")?;

        let mut transactions = self.transactions.write().await;
        if let Some(existing) = transactions.get(&new.transaction_id) {
            return Ok(BeginResult {
                transaction: existing.clone(),
                is_new: false,
            });
        }

        let tx = SagaTransaction::begin(new);
        transactions.insert(tx.transaction_id.clone(), tx.clone());
        Ok(BeginResult {
            transaction: tx,
            is_new: true,
        })
    }

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaTransaction>> {
        Ok(self.transactions.read().await.get(transaction_id).cloned())
    }

    async fn advance(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        to: SagaStep,
    ) -> Result<SagaTransaction> {
        if to == SagaStep::Failed {
            return Err(StoreError::InvalidTransition { from, to });
        }
        validate_transition(from, to)?;
        self.compare_and_set(transaction_id, from, |tx| tx.apply_advance(to))
            .await
    }

    async fn record_attempt(
        &self,
        transaction_id: &TransactionId,
        step: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction> {
        let error = error.to_string();
        self.compare_and_set(transaction_id, step, move |tx| {
            tx.apply_attempt_failure(error)
        })
        .await
    }

    async fn fail(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction> {
        validate_transition(from, SagaStep::Failed)?;
        let error = error.to_string();
        self.compare_and_set(transaction_id, from, move |tx| tx.apply_failure(error))
            .await
    }

    async fn list_unfinished(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        Ok(self.list_where(limit, |tx| !tx.is_terminal()).await)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        Ok(self
            .list_where(limit, |tx| tx.current_step == SagaStep::Failed)
            .await)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn record_payment(
        &self,
        transaction_id: &TransactionId,
        user_id: &UserId,
        course_id: &CourseId,
        amount: Money,
    ) -> Result<UpsertResult<PaymentRecord>> {
        Faults::trip(&self.faults.payment_writes, "payment")?;

        let mut payments = self.payments.write().await;
        if let Some(existing) = payments.get(transaction_id) {
            return Ok(UpsertResult {
                record: existing.clone(),
                created: false,
            });
        }

        let record = PaymentRecord {
            transaction_id: transaction_id.clone(),
            user_id: user_id.clone(),
            course_id: course_id.clone(),
            amount,
            recorded_at: Utc::now(),
        };
        payments.insert(transaction_id.clone(), record.clone());
        Ok(UpsertResult {
            record,
            created: true,
        })
    }

    async fn get_payment(&self, transaction_id: &TransactionId) -> Result<Option<PaymentRecord>> {
        Ok(self.payments.read().await.get(transaction_id).cloned())
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryStore {
    async fn create_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        course_code: &str,
    ) -> Result<UpsertResult<EnrollmentRecord>> {
        Faults::trip(&self.faults.enrollment_writes, "enrollment")?;

        let mut enrollments = self.enrollments.write().await;
        let key = (user_id.clone(), course_id.clone());
        if let Some(existing) = enrollments.get(&key) {
            return Ok(UpsertResult {
                record: existing.clone(),
                created: false,
            });
        }

        let record = EnrollmentRecord::new(
            user_id.clone(),
            course_id.clone(),
            Some(course_code.to_string()),
        );
        enrollments.insert(key, record.clone());
        Ok(UpsertResult {
            record,
            created: true,
        })
    }

    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<EnrollmentRecord>> {
        let key = (user_id.clone(), course_id.clone());
        Ok(self.enrollments.read().await.get(&key).cloned())
    }

    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<EnrollmentRecord>> {
        let enrollments = self.enrollments.read().await;
        let mut records: Vec<_> = enrollments
            .values()
            .filter(|record| &record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.course_id.cmp(&b.course_id))
        });
        Ok(records)
    }

    async fn update_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: Progress,
    ) -> Result<EnrollmentRecord> {
        Faults::trip(&self.faults.enrollment_writes, "enrollment")?;

        let mut enrollments = self.enrollments.write().await;
        let record = enrollments
            .entry((user_id.clone(), course_id.clone()))
            .or_insert_with(|| EnrollmentRecord::new(user_id.clone(), course_id.clone(), None));
        record.set_progress(progress);
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tx(id: &str) -> NewTransaction {
        NewTransaction {
            transaction_id: TransactionId::new(id),
            user_id: UserId::new("u1"),
            course_id: CourseId::new("c1"),
            course_code: "CS101".to_string(),
            amount: Money::from_cents(4999),
        }
    }

    #[tokio::test]
    async fn begin_is_idempotent() {
        let store = InMemoryStore::new();

        let first = store.begin(new_tx("tx-1")).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.transaction.current_step, SagaStep::Pending);

        store
            .advance(
                &first.transaction.transaction_id,
                SagaStep::Pending,
                SagaStep::PaymentRecorded,
            )
            .await
            .unwrap();

        let mut replay = new_tx("tx-1");
        replay.amount = Money::from_cents(1);
        let second = store.begin(replay).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.transaction.current_step, SagaStep::PaymentRecorded);
        assert_eq!(second.transaction.amount, Money::from_cents(4999));
        assert_eq!(store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn advance_is_compare_and_set() {
        let store = InMemoryStore::new();
        let id = store.begin(new_tx("tx-1")).await.unwrap().transaction.transaction_id;

        let tx = store
            .advance(&id, SagaStep::Pending, SagaStep::PaymentRecorded)
            .await
            .unwrap();
        assert_eq!(tx.current_step, SagaStep::PaymentRecorded);

        let err = store
            .advance(&id, SagaStep::Pending, SagaStep::PaymentRecorded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StepConflict {
                expected: SagaStep::Pending,
                actual: SagaStep::PaymentRecorded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn advance_rejects_skips_and_failed() {
        let store = InMemoryStore::new();
        let id = store.begin(new_tx("tx-1")).await.unwrap().transaction.transaction_id;

        assert!(matches!(
            store
                .advance(&id, SagaStep::Pending, SagaStep::AccessGranted)
                .await,
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.advance(&id, SagaStep::Pending, SagaStep::Failed).await,
            Err(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn advance_unknown_transaction() {
        let store = InMemoryStore::new();
        let result = store
            .advance(
                &TransactionId::new("missing"),
                SagaStep::Pending,
                SagaStep::PaymentRecorded,
            )
            .await;
        assert!(matches!(result, Err(StoreError::TransactionNotFound(_))));
    }

    #[tokio::test]
    async fn record_attempt_and_fail() {
        let store = InMemoryStore::new();
        let id = store.begin(new_tx("tx-1")).await.unwrap().transaction.transaction_id;

        let tx = store
            .record_attempt(&id, SagaStep::Pending, "timeout")
            .await
            .unwrap();
        assert_eq!(tx.attempt_count, 1);
        assert_eq!(tx.last_error.as_deref(), Some("timeout"));

        let tx = store.fail(&id, SagaStep::Pending, "exhausted").await.unwrap();
        assert_eq!(tx.current_step, SagaStep::Failed);

        assert!(store.fail(&id, SagaStep::Failed, "again").await.is_err());
        assert_eq!(store.list_failed(10).await.unwrap().len(), 1);
        assert!(store.list_unfinished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_payment_once_per_transaction() {
        let store = InMemoryStore::new();
        let id = TransactionId::new("tx-1");
        let user = UserId::new("u1");
        let course = CourseId::new("c1");

        let first = store
            .record_payment(&id, &user, &course, Money::from_cents(4999))
            .await
            .unwrap();
        assert!(first.created);
        let second = store
            .record_payment(&id, &user, &course, Money::from_cents(4999))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.record, first.record);
        assert_eq!(store.payment_count().await, 1);
    }

    #[tokio::test]
    async fn create_enrollment_returns_existing_unchanged() {
        let store = InMemoryStore::new();
        let user = UserId::new("u1");
        let course = CourseId::new("c1");

        let first = store.create_enrollment(&user, &course, "CS101").await.unwrap();
        assert!(first.created);
        store
            .update_progress(&user, &course, Progress::new(40).unwrap())
            .await
            .unwrap();

        let second = store.create_enrollment(&user, &course, "OTHER").await.unwrap();
        assert!(!second.created);
        assert_eq!(second.record.course_code.as_deref(), Some("CS101"));
        assert_eq!(second.record.progress_percentage.value(), 40);
        assert_eq!(store.enrollment_count().await, 1);
    }

    #[tokio::test]
    async fn update_progress_creates_missing_enrollment() {
        let store = InMemoryStore::new();
        let user = UserId::new("u1");
        let course = CourseId::new("c9");

        let record = store
            .update_progress(&user, &course, Progress::new(10).unwrap())
            .await
            .unwrap();
        assert_eq!(record.progress_percentage.value(), 10);
        assert!(record.course_code.is_none());
        assert_eq!(store.list_enrollments(&user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let store = InMemoryStore::new();
        store.fail_next_payment_writes(2);
        let id = TransactionId::new("tx-1");
        let user = UserId::new("u1");
        let course = CourseId::new("c1");
        let amount = Money::from_cents(100);

        for _ in 0..2 {
            let err = store
                .record_payment(&id, &user, &course, amount)
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }
        assert!(store.record_payment(&id, &user, &course, amount).await.is_ok());
    }
}

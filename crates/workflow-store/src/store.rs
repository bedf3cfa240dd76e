use async_trait::async_trait;
use common::{CourseId, TransactionId, UserId};
use domain::{
    EnrollmentRecord, Money, NewTransaction, PaymentRecord, Progress, SagaStep, SagaTransaction,
};

use crate::{Result, StoreError};

/// Outcome of [`IdempotencyLedger::begin`].
#[derive(Debug, Clone)]
pub struct BeginResult {
    /// The stored transaction: freshly created, or the existing one unchanged.
    pub transaction: SagaTransaction,
    /// True if this call created the entry.
    pub is_new: bool,
}

/// Outcome of an insert-if-absent operation.
#[derive(Debug, Clone)]
pub struct UpsertResult<T> {
    /// The stored record.
    pub record: T,
    /// True if this call inserted it.
    pub created: bool,
}

/// Durable record of payment transactions and the workflow step each reached.
///
/// All mutations are compare-and-set on the stored step: they succeed only if
/// the step still equals the caller's expectation, and fail with
/// [`StoreError::StepConflict`] otherwise. A mutation returning `Ok` is
/// durable.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Creates the entry for a transaction, or returns the existing one
    /// unchanged with `is_new = false`.
    async fn begin(&self, new: NewTransaction) -> Result<BeginResult>;

    /// Loads a transaction.
    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaTransaction>>;

    /// Moves `from -> to`. `to` must be the happy-path successor of `from`.
    async fn advance(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        to: SagaStep,
    ) -> Result<SagaTransaction>;

    /// Records a failed attempt of `step`, incrementing `attempt_count`.
    async fn record_attempt(
        &self,
        transaction_id: &TransactionId,
        step: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction>;

    /// Marks the transaction FAILED if it is still at `from`.
    async fn fail(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction>;

    /// Non-terminal transactions, oldest first.
    async fn list_unfinished(&self, limit: usize) -> Result<Vec<SagaTransaction>>;

    /// FAILED transactions awaiting manual reconciliation, oldest first.
    async fn list_failed(&self, limit: usize) -> Result<Vec<SagaTransaction>>;
}

/// Payments recorded against transactions. One record per transaction.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Records the payment unless one already exists for the transaction.
    async fn record_payment(
        &self,
        transaction_id: &TransactionId,
        user_id: &UserId,
        course_id: &CourseId,
        amount: Money,
    ) -> Result<UpsertResult<PaymentRecord>>;

    /// Loads the payment of a transaction.
    async fn get_payment(&self, transaction_id: &TransactionId) -> Result<Option<PaymentRecord>>;
}

/// Enrollment records keyed by (user, course).
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Creates the enrollment unless one exists; an existing record is
    /// returned unchanged.
    async fn create_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        course_code: &str,
    ) -> Result<UpsertResult<EnrollmentRecord>>;

    /// Loads a single enrollment.
    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<EnrollmentRecord>>;

    /// All enrollments of a user, oldest first.
    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<EnrollmentRecord>>;

    /// Sets progress, creating the enrollment if it does not exist yet.
    async fn update_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: Progress,
    ) -> Result<EnrollmentRecord>;
}

/// A single backend providing every store the saga needs.
pub trait WorkflowStore:
    IdempotencyLedger + PaymentStore + EnrollmentStore + Clone + 'static
{
}

impl<T> WorkflowStore for T where
    T: IdempotencyLedger + PaymentStore + EnrollmentStore + Clone + 'static
{
}

/// Validates a ledger transition before it is attempted.
///
/// `to` must be `from.next()`, or `Failed` from any non-terminal step.
pub fn validate_transition(from: SagaStep, to: SagaStep) -> Result<()> {
    let allowed = match to {
        SagaStep::Failed => !from.is_terminal(),
        _ => from.next() == Some(to),
    };
    if allowed {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition { from, to })
    }
}

//! Idempotent executors for the three side-effecting saga steps.
//!
//! Each executor may run any number of times for the same transaction,
//! including after a crash that happened between its side effect and the
//! ledger advance. Running it again must not duplicate the effect.

use async_trait::async_trait;
use domain::{SagaStep, SagaTransaction};
use workflow_store::{EnrollmentStore, PaymentStore};

use crate::error::StepError;
use crate::services::UserDirectory;

/// Result of a step execution.
pub type StepResult = Result<(), StepError>;

/// Performs the side effect that moves a transaction out of one step.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Step the ledger advances to once this executor succeeds.
    fn target(&self) -> SagaStep;

    async fn execute(&self, transaction: &SagaTransaction) -> StepResult;
}

/// PENDING -> PAYMENT_RECORDED: persists the payment record.
#[derive(Debug, Clone)]
pub struct RecordPayment<S> {
    store: S,
}

impl<S: PaymentStore> RecordPayment<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: PaymentStore> StepExecutor for RecordPayment<S> {
    fn name(&self) -> &'static str {
        "record_payment"
    }

    fn target(&self) -> SagaStep {
        SagaStep::PaymentRecorded
    }

    async fn execute(&self, tx: &SagaTransaction) -> StepResult {
        let result = self
            .store
            .record_payment(&tx.transaction_id, &tx.user_id, &tx.course_id, tx.amount)
            .await?;

        let payment = result.record;
        if payment.user_id != tx.user_id
            || payment.course_id != tx.course_id
            || payment.amount != tx.amount
        {
            return Err(StepError::Fatal(format!(
                "payment already recorded for {} with different details",
                tx.transaction_id
            )));
        }

        if !result.created {
            tracing::debug!(transaction_id = %tx.transaction_id, "Payment already recorded");
        }
        Ok(())
    }
}

/// PAYMENT_RECORDED -> ACCESS_GRANTED: adds the course to the user's list.
#[derive(Debug, Clone)]
pub struct GrantCourseAccess<U> {
    directory: U,
}

impl<U: UserDirectory> GrantCourseAccess<U> {
    pub fn new(directory: U) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<U: UserDirectory> StepExecutor for GrantCourseAccess<U> {
    fn name(&self) -> &'static str {
        "grant_access"
    }

    fn target(&self) -> SagaStep {
        SagaStep::AccessGranted
    }

    async fn execute(&self, tx: &SagaTransaction) -> StepResult {
        self.directory
            .grant_access(&tx.user_id, &tx.course_id)
            .await
            .map_err(StepError::from)
    }
}

/// ACCESS_GRANTED -> ENROLLMENT_CONFIRMED: creates the enrollment record.
#[derive(Debug, Clone)]
pub struct ConfirmEnrollment<S> {
    store: S,
}

impl<S: EnrollmentStore> ConfirmEnrollment<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: EnrollmentStore> StepExecutor for ConfirmEnrollment<S> {
    fn name(&self) -> &'static str {
        "confirm_enrollment"
    }

    fn target(&self) -> SagaStep {
        SagaStep::EnrollmentConfirmed
    }

    async fn execute(&self, tx: &SagaTransaction) -> StepResult {
        let result = self
            .store
            .create_enrollment(&tx.user_id, &tx.course_id, &tx.course_code)
            .await?;

        if result.created {
            metrics::counter!("enrollments_created_total").increment(1);
        } else {
            tracing::debug!(
                user_id = %tx.user_id,
                course_id = %tx.course_id,
                "Enrollment already exists"
            );
        }
        Ok(())
    }
}

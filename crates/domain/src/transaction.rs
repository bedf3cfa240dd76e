//! The saga transaction: idempotency ledger entry of one payment.

use chrono::{DateTime, Utc};
use common::{CourseId, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::money::Money;
use crate::step::SagaStep;

/// Transaction ids that would shadow `/workflow/{segment}` routes.
const RESERVED_TRANSACTION_IDS: &[&str] = &["failed", "enroll-on-payment"];

/// A payment capture confirmation as reported to the workflow.
///
/// The amount here is what the caller claims; it is checked against the
/// payment provider before a transaction is admitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub payment_transaction_id: TransactionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_code: String,
    pub amount: f64,
}

impl PaymentConfirmation {
    /// Checks required fields and returns the claimed amount.
    pub fn validate(&self) -> Result<Money, DomainError> {
        if self.payment_transaction_id.is_blank() {
            return Err(DomainError::EmptyField("paymentTransactionId"));
        }
        let id = self.payment_transaction_id.as_str().trim();
        if RESERVED_TRANSACTION_IDS.contains(&id) {
            return Err(DomainError::ReservedIdentifier(id.to_string()));
        }
        if self.user_id.is_blank() {
            return Err(DomainError::EmptyField("userId"));
        }
        if self.course_id.is_blank() {
            return Err(DomainError::EmptyField("courseId"));
        }
        if self.course_code.trim().is_empty() {
            return Err(DomainError::EmptyField("courseCode"));
        }
        Money::from_decimal(self.amount)
    }
}

/// Input to the ledger's `begin` operation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_code: String,
    /// Amount verified with the payment provider.
    pub amount: Money,
}

/// One recorded step change, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTransition {
    pub from: SagaStep,
    pub to: SagaStep,
    pub at: DateTime<Utc>,
}

/// Durable state of one enrollment workflow, keyed by payment transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaTransaction {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_code: String,
    pub amount: Money,
    pub current_step: SagaStep,
    pub last_error: Option<String>,
    /// Failed attempts of the step currently being attempted.
    pub attempt_count: u32,
    pub history: Vec<StepTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaTransaction {
    /// Creates a pending transaction.
    pub fn begin(new: NewTransaction) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: new.transaction_id,
            user_id: new.user_id,
            course_id: new.course_id,
            course_code: new.course_code,
            amount: new.amount,
            current_step: SagaStep::Pending,
            last_error: None,
            attempt_count: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `to`, resetting the attempt counter of the finished step.
    pub fn apply_advance(&mut self, to: SagaStep) {
        let now = Utc::now();
        self.history.push(StepTransition {
            from: self.current_step,
            to,
            at: now,
        });
        self.current_step = to;
        self.attempt_count = 0;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Records a failed attempt of the current step.
    pub fn apply_attempt_failure(&mut self, error: impl Into<String>) {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
    }

    /// Moves to the FAILED terminal state.
    pub fn apply_failure(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.history.push(StepTransition {
            from: self.current_step,
            to: SagaStep::Failed,
            at: now,
        });
        self.current_step = SagaStep::Failed;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Returns true once the workflow can make no further progress.
    pub fn is_terminal(&self) -> bool {
        self.current_step.is_terminal()
    }

    /// Returns true if the given step was reached at some point.
    pub fn has_reached(&self, step: SagaStep) -> bool {
        self.current_step.has_reached(step) || self.history.iter().any(|t| t.to == step)
    }
}

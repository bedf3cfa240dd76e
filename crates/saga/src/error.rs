//! Saga error types.

use common::TransactionId;
use domain::{DomainError, Money};
use thiserror::Error;
use workflow_store::StoreError;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was understood and refused.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The collaborator could not be reached or timed out.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Returns true for failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_))
    }
}

/// Outcome of a failed step execution.
///
/// Executors never return anything else across the orchestrator boundary;
/// the orchestrator decides between retrying and failing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// Transient failure (store/network unavailable, timeout).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Validation failure that no retry can fix.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<ServiceError> for StepError {
    fn from(err: ServiceError) -> Self {
        if err.is_transient() {
            StepError::Retryable(err.to_string())
        } else {
            StepError::Fatal(err.to_string())
        }
    }
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            StepError::Retryable(err.to_string())
        } else {
            StepError::Fatal(err.to_string())
        }
    }
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The confirmation failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// The claimed amount differs from what the provider captured.
    #[error("Amount mismatch: claimed {claimed}, captured {verified}")]
    AmountMismatch { claimed: Money, verified: Money },

    /// The payment provider does not confirm this capture.
    #[error("Payment not verified: {0}")]
    PaymentNotVerified(String),

    /// A collaborator needed for admission is unavailable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// No ledger entry exists for the transaction.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The background worker is no longer accepting work.
    #[error("Saga worker stopped")]
    WorkerStopped,
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

//! Saga workflow steps.

use serde::{Deserialize, Serialize};

/// The step a saga transaction has durably reached.
///
/// State transitions:
/// ```text
/// Pending ──► PaymentRecorded ──► AccessGranted ──► EnrollmentConfirmed ──► Complete
///    │               │                  │                    │
///    └───────────────┴──────────────────┴────────────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    /// Admitted; no side effect has been confirmed yet.
    #[default]
    Pending,

    /// The captured payment is recorded against the transaction.
    PaymentRecorded,

    /// The course has been added to the user's enrolled-course set.
    AccessGranted,

    /// The enrollment record exists for (user, course).
    EnrollmentConfirmed,

    /// Workflow finished (terminal state).
    Complete,

    /// Retries exhausted or a fatal error occurred (terminal state).
    Failed,
}

impl SagaStep {
    /// All steps on the happy path, in order.
    pub const HAPPY_PATH: [SagaStep; 5] = [
        SagaStep::Pending,
        SagaStep::PaymentRecorded,
        SagaStep::AccessGranted,
        SagaStep::EnrollmentConfirmed,
        SagaStep::Complete,
    ];

    /// Returns the successor on the happy path, or `None` for terminal steps.
    pub fn next(&self) -> Option<SagaStep> {
        match self {
            SagaStep::Pending => Some(SagaStep::PaymentRecorded),
            SagaStep::PaymentRecorded => Some(SagaStep::AccessGranted),
            SagaStep::AccessGranted => Some(SagaStep::EnrollmentConfirmed),
            SagaStep::EnrollmentConfirmed => Some(SagaStep::Complete),
            SagaStep::Complete | SagaStep::Failed => None,
        }
    }

    /// Position on the happy path. `Failed` has none.
    pub fn ordinal(&self) -> Option<usize> {
        Self::HAPPY_PATH.iter().position(|step| step == self)
    }

    /// Returns true if `self` is at or past `other` on the happy path.
    pub fn has_reached(&self, other: SagaStep) -> bool {
        match (self.ordinal(), other.ordinal()) {
            (Some(current), Some(target)) => current >= target,
            _ => false,
        }
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Complete | SagaStep::Failed)
    }

    /// Returns the step name as used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Pending => "PENDING",
            SagaStep::PaymentRecorded => "PAYMENT_RECORDED",
            SagaStep::AccessGranted => "ACCESS_GRANTED",
            SagaStep::EnrollmentConfirmed => "ENROLLMENT_CONFIRMED",
            SagaStep::Complete => "COMPLETE",
            SagaStep::Failed => "FAILED",
        }
    }

    /// Parses a stored step name.
    pub fn parse(value: &str) -> Option<SagaStep> {
        match value {
            "PENDING" => Some(SagaStep::Pending),
            "PAYMENT_RECORDED" => Some(SagaStep::PaymentRecorded),
            "ACCESS_GRANTED" => Some(SagaStep::AccessGranted),
            "ENROLLMENT_CONFIRMED" => Some(SagaStep::EnrollmentConfirmed),
            "COMPLETE" => Some(SagaStep::Complete),
            "FAILED" => Some(SagaStep::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Domain validation errors.

use thiserror::Error;

/// Validation failures of domain input. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    /// A required field was empty.
    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// The amount is not a positive, finite monetary value.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The identifier collides with a fixed route segment.
    #[error("Identifier '{0}' is reserved")]
    ReservedIdentifier(String),

    /// Progress percentage outside the 0-100 range.
    #[error("Progress percentage {0} is out of range (0-100)")]
    ProgressOutOfRange(i64),
}

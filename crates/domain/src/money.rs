//! Monetary amounts.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Money amount represented in cents to avoid floating point issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    /// Amount in cents (e.g., 4999 = $49.99)
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Converts a decimal amount as sent by the payment provider (`49.99`).
    ///
    /// Rounds to the nearest cent. Rejects non-finite and non-positive values.
    pub fn from_decimal(amount: f64) -> Result<Self, DomainError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(DomainError::InvalidAmount(amount.to_string()));
        }
        let cents = (amount * 100.0).round();
        if cents < 1.0 || cents > i64::MAX as f64 {
            return Err(DomainError::InvalidAmount(amount.to_string()));
        }
        Ok(Self {
            cents: cents as i64,
        })
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the amount as a decimal value for wire formats.
    pub fn as_decimal(&self) -> f64 {
        self.cents as f64 / 100.0
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

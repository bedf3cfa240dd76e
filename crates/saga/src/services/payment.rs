//! Payment provider verification.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use async_trait::async_trait;
use common::TransactionId;
use domain::{Money, PaymentConfirmation};

use crate::error::ServiceError;

/// A capture as confirmed by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCapture {
    pub transaction_id: TransactionId,
    /// The amount actually captured. Authoritative over the caller's claim.
    pub amount: Money,
}

/// Confirms with the payment provider that a capture really happened.
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    /// Looks up the capture referenced by `confirmation`.
    async fn verify_capture(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<VerifiedCapture, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryVerifierState {
    captures: HashMap<TransactionId, Money>,
    permissive: bool,
    unavailable: bool,
    calls: usize,
}

/// In-memory payment verifier.
///
/// Strict by default: only captures registered with
/// [`register_capture`](Self::register_capture) verify. A permissive verifier
/// trusts the claimed amount of unregistered captures, for local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentVerifier {
    state: Arc<RwLock<InMemoryVerifierState>>,
}

impl InMemoryPaymentVerifier {
    /// Creates a strict verifier with no registered captures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a verifier that accepts unregistered captures at face value.
    pub fn permissive() -> Self {
        let verifier = Self::default();
        verifier.write().permissive = true;
        verifier
    }

    /// Registers a capture the provider will confirm.
    pub fn register_capture(&self, transaction_id: impl Into<TransactionId>, amount: Money) {
        self.write().captures.insert(transaction_id.into(), amount);
    }

    /// Makes every verification fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    /// Number of verification calls made so far.
    pub fn call_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryVerifierState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PaymentVerifier for InMemoryPaymentVerifier {
    async fn verify_capture(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<VerifiedCapture, ServiceError> {
        let mut state = self.write();
        state.calls += 1;

        if state.unavailable {
            return Err(ServiceError::Unavailable(
                "payment provider unreachable".to_string(),
            ));
        }

        let id = &confirmation.payment_transaction_id;
        let amount = match state.captures.get(id) {
            Some(amount) => *amount,
            None if state.permissive => Money::from_decimal(confirmation.amount)
                .map_err(|e| ServiceError::Rejected(e.to_string()))?,
            None => return Err(ServiceError::NotFound(format!("capture {id}"))),
        };

        Ok(VerifiedCapture {
            transaction_id: id.clone(),
            amount,
        })
    }
}

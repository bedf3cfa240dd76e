//! Durable state of the enrollment workflow.
//!
//! Three stores back the saga:
//! - the idempotency ledger of [`SagaTransaction`](domain::SagaTransaction)s,
//!   advanced only through compare-and-set on the current step;
//! - payment records, unique per transaction;
//! - enrollment records, unique per (user, course).
//!
//! Every mutation is identity-scoped (CAS or insert-if-absent), so concurrent
//! orchestrators can share a store without broader locks.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    BeginResult, EnrollmentStore, IdempotencyLedger, PaymentStore, UpsertResult, WorkflowStore,
    validate_transition,
};

//! Data model of the post-payment enrollment workflow.
//!
//! The workflow turns a captured payment into an enrollment through three
//! ordered steps, each recorded durably on a [`SagaTransaction`]:
//! 1. Record payment
//! 2. Grant course access
//! 3. Create/confirm enrollment

pub mod enrollment;
pub mod error;
pub mod money;
pub mod progress;
pub mod step;
pub mod transaction;

pub use common::{CourseId, TransactionId, UserId};
pub use enrollment::{EnrollmentRecord, PaymentRecord};
pub use error::DomainError;
pub use money::Money;
pub use progress::Progress;
pub use step::SagaStep;
pub use transaction::{NewTransaction, PaymentConfirmation, SagaTransaction, StepTransition};

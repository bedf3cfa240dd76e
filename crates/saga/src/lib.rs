//! Saga orchestration of the post-payment enrollment workflow.
//!
//! A captured payment is admitted onto the idempotency ledger and driven
//! through three ordered, idempotent steps:
//! 1. Record payment
//! 2. Grant course access
//! 3. Create/confirm enrollment
//!
//! Steps are retried with bounded backoff. There is no compensation: a
//! transaction that cannot proceed is marked FAILED and an alert is raised.
//! Notifications are sent once, after the transaction reaches COMPLETE.

pub mod error;
pub mod notifications;
pub mod orchestrator;
pub mod retry;
pub mod services;
pub mod steps;
pub mod worker;

pub use error::{SagaError, ServiceError, StepError};
pub use notifications::{DispatchReport, NotificationDispatcher};
pub use orchestrator::{Admission, ResumeReport, SagaOrchestrator};
pub use retry::RetryPolicy;
pub use services::{
    Channel, InMemoryNotificationTransport, InMemoryPaymentVerifier, InMemoryUserDirectory,
    LogNotificationTransport, NotificationMessage, NotificationTransport, PaymentVerifier,
    SentNotification, UserDirectory, UserProfile, VerifiedCapture,
};
pub use steps::{ConfirmEnrollment, GrantCourseAccess, RecordPayment, StepExecutor, StepResult};
pub use worker::{SagaWorker, WorkerConfig, WorkerHandle};

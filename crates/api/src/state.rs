//! Shared application state.

use std::sync::Arc;

use saga::{
    InMemoryPaymentVerifier, InMemoryUserDirectory, LogNotificationTransport, SagaOrchestrator,
    WorkerHandle,
};
use workflow_store::WorkflowStore;

/// Orchestrator wired with the collaborators the server runs with.
pub type Orchestrator<S> =
    SagaOrchestrator<S, InMemoryPaymentVerifier, InMemoryUserDirectory, LogNotificationTransport>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: WorkflowStore> {
    pub store: S,
    pub orchestrator: Arc<Orchestrator<S>>,
    pub worker: WorkerHandle,
    pub verifier: InMemoryPaymentVerifier,
    pub directory: InMemoryUserDirectory,
}

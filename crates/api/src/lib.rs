//! HTTP API server for the post-payment enrollment workflow.
//!
//! Admits payment confirmations into the saga, exposes workflow status and
//! enrollment records, with structured logging (tracing) and Prometheus
//! metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{MethodRouter, get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    InMemoryPaymentVerifier, InMemoryUserDirectory, LogNotificationTransport, SagaOrchestrator,
    SagaWorker,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow_store::WorkflowStore;

use auth::{AuthConfig, Capability};
use config::{Config, PaymentVerification};
use routes::{enrollments, workflow};
use state::AppState;

/// Worker type driving the server's orchestrator.
pub type Worker<S> =
    SagaWorker<S, InMemoryPaymentVerifier, InMemoryUserDirectory, LogNotificationTransport>;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: WorkflowStore>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
    auth: AuthConfig,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let api_router = Router::new()
        .route(
            "/workflow/enroll-on-payment",
            guarded(
                post(workflow::enroll_on_payment::<S>),
                Capability::SubmitPayment,
            ),
        )
        .route(
            "/workflow/failed",
            guarded(get(workflow::failed::<S>), Capability::Reconcile),
        )
        .route(
            "/workflow/{transaction_id}",
            guarded(get(workflow::get::<S>), Capability::ViewWorkflow),
        )
        .route(
            "/enrollments/{user_id}",
            guarded(get(enrollments::list::<S>), Capability::ViewEnrollments),
        )
        .route(
            "/enrollments/{user_id}/{course_id}",
            guarded(get(enrollments::get::<S>), Capability::ViewEnrollments),
        )
        .route(
            "/enrollments/{user_id}/{course_id}/exists",
            guarded(get(enrollments::exists::<S>), Capability::ViewEnrollments),
        )
        .route(
            "/enrollments/{user_id}/{course_id}/progress",
            guarded(
                post(enrollments::update_progress::<S>),
                Capability::UpdateProgress,
            ),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::new(auth),
            auth::authenticate,
        ))
        .with_state(state);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(api_router)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a route in the capability check for `capability`.
fn guarded<T>(route: MethodRouter<T>, capability: Capability) -> MethodRouter<T>
where
    T: Clone + Send + Sync + 'static,
{
    route.route_layer(middleware::from_fn_with_state(capability, auth::require))
}

/// Creates the application state and its background worker.
///
/// The caller runs the worker; admitted transactions only progress while it
/// is running.
pub fn create_default_state<S: WorkflowStore>(
    store: S,
    config: &Config,
) -> (Arc<AppState<S>>, Worker<S>) {
    let verifier = match config.payment_verification {
        PaymentVerification::Strict => InMemoryPaymentVerifier::new(),
        PaymentVerification::Permissive => {
            tracing::warn!("Payment verification is permissive; captures are trusted as reported");
            InMemoryPaymentVerifier::permissive()
        }
    };
    for (transaction_id, amount) in &config.capture_seed {
        verifier.register_capture(transaction_id.clone(), *amount);
    }

    let directory = InMemoryUserDirectory::new();
    for profile in &config.directory_seed {
        directory.add_user(profile.clone());
    }

    let orchestrator = Arc::new(
        SagaOrchestrator::new(
            store.clone(),
            verifier.clone(),
            directory.clone(),
            LogNotificationTransport,
        )
        .with_policy(config.retry),
    );
    let (worker, handle) = SagaWorker::new(orchestrator.clone(), config.worker);

    let state = Arc::new(AppState {
        store,
        orchestrator,
        worker: handle,
        verifier,
        directory,
    });

    (state, worker)
}

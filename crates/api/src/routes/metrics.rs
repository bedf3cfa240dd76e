//! Prometheus metrics recorder and endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and describes the saga metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

fn describe() {
    metrics::describe_counter!("saga_admissions_total", "Payment confirmations admitted, by outcome");
    metrics::describe_counter!("saga_step_attempts_total", "Step executions started, by step");
    metrics::describe_counter!("saga_step_retries_total", "Retryable step failures, by step");
    metrics::describe_counter!("saga_completed", "Transactions that reached COMPLETE");
    metrics::describe_counter!("saga_failed", "Transactions that reached FAILED");
    metrics::describe_counter!("saga_alerts_total", "Reconciliation alerts raised");
    metrics::describe_histogram!(
        "saga_duration_seconds",
        metrics::Unit::Seconds,
        "Processing time of completed transactions"
    );
    metrics::describe_counter!("notifications_sent_total", "Notifications delivered, by channel");
    metrics::describe_counter!("notifications_failed_total", "Notification failures, by channel");
    metrics::describe_counter!("enrollments_created_total", "Enrollment records created");
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}

//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;
use workflow_store::StoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// No usable identity on the request.
    Unauthorized(String),
    /// The principal lacks the capability for this action.
    Forbidden(String),
    /// Domain validation error.
    Domain(DomainError),
    /// Saga admission or lookup error.
    Saga(SagaError),
    /// Store error outside the saga.
    Store(StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Domain(err) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
            ApiError::Saga(err) => saga_error_to_response(err),
            ApiError::Store(err) => store_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match err {
        SagaError::Validation(_)
        | SagaError::AmountMismatch { .. }
        | SagaError::PaymentNotVerified(_) => (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        SagaError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::ServiceUnavailable(_) | SagaError::WorkerStopped => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        SagaError::Store(store_err) => store_error_to_response(store_err),
    }
}

fn store_error_to_response(err: StoreError) -> (StatusCode, String) {
    match &err {
        StoreError::TransactionNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ if err.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use domain::Money;

    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_validation_errors_are_unprocessable() {
        assert_eq!(
            status_of(DomainError::ProgressOutOfRange(150).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(
                SagaError::AmountMismatch {
                    claimed: Money::from_cents(4999),
                    verified: Money::from_cents(1000),
                }
                .into()
            ),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_not_found_and_auth() {
        assert_eq!(
            status_of(SagaError::TransactionNotFound("tx-9".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Unauthorized("missing".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ApiError::Forbidden("nope".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_infrastructure_errors() {
        assert_eq!(
            status_of(StoreError::Unavailable("down".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::CorruptRow("bad".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SagaError::WorkerStopped.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

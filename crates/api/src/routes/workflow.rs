//! Enrollment workflow admission and status endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use common::TransactionId;
use domain::{PaymentConfirmation, SagaStep, SagaTransaction, StepTransition};
use saga::SagaError;
use serde::Serialize;
use workflow_store::WorkflowStore;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::state::AppState;

const FAILED_PAGE_SIZE: usize = 100;

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub transaction_id: TransactionId,
    pub current_step: SagaStep,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub course_id: String,
    pub course_code: String,
    pub amount: f64,
    pub current_step: SagaStep,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub history: Vec<StepTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SagaTransaction> for TransactionResponse {
    fn from(tx: SagaTransaction) -> Self {
        Self {
            amount: tx.amount.as_decimal(),
            transaction_id: tx.transaction_id,
            user_id: tx.user_id.to_string(),
            course_id: tx.course_id.to_string(),
            course_code: tx.course_code,
            current_step: tx.current_step,
            last_error: tx.last_error,
            attempt_count: tx.attempt_count,
            history: tx.history,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

// -- Handlers --

/// POST /workflow/enroll-on-payment: admit a captured payment.
///
/// Responds 202 for a new transaction and 200 for a replay. The workflow
/// itself runs in the background.
#[tracing::instrument(skip_all)]
pub async fn enroll_on_payment<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<PaymentConfirmation>,
) -> Result<(StatusCode, Json<AdmissionResponse>), ApiError> {
    principal.ensure_subject(&req.user_id)?;

    let admission = state.orchestrator.admit(req).await?;
    let tx = admission.transaction;

    // Replays of unfinished transactions are resubmitted too, so a lost
    // submission is picked up without waiting for the recovery sweep. The
    // ledger entry is durable by now; a stopped worker leaves it to the sweep.
    if !tx.is_terminal()
        && let Err(err) = state.worker.submit(tx.transaction_id.clone())
    {
        tracing::warn!(
            transaction_id = %tx.transaction_id,
            error = %err,
            "Admitted transaction left for the recovery sweep"
        );
    }

    let status = if admission.is_new {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(AdmissionResponse {
            transaction_id: tx.transaction_id,
            current_step: tx.current_step,
        }),
    ))
}

/// GET /workflow/{transactionId}: current state of a transaction.
///
/// Another user's transaction is reported as not found to a learner, so the
/// response does not reveal which ids exist.
#[tracing::instrument(skip(state, principal))]
pub async fn get<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(principal): Extension<Principal>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = TransactionId::from(transaction_id);
    let tx = state.orchestrator.get_transaction(&transaction_id).await?;
    if !principal.may_act_on(&tx.user_id) {
        return Err(SagaError::TransactionNotFound(transaction_id).into());
    }
    Ok(Json(tx.into()))
}

/// GET /workflow/failed: FAILED transactions awaiting reconciliation.
#[tracing::instrument(skip_all)]
pub async fn failed<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<TransactionResponse>>, ApiError> {
    let failed = state.orchestrator.list_failed(FAILED_PAGE_SIZE).await?;
    Ok(Json(failed.into_iter().map(Into::into).collect()))
}

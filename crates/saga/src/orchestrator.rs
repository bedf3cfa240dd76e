//! Saga orchestrator for the post-payment enrollment workflow.

use std::time::Instant;

use common::TransactionId;
use domain::{NewTransaction, PaymentConfirmation, SagaStep, SagaTransaction};
use uuid::Uuid;
use workflow_store::{StoreError, WorkflowStore};

use crate::error::{Result, SagaError, StepError};
use crate::notifications::NotificationDispatcher;
use crate::retry::RetryPolicy;
use crate::services::{NotificationTransport, PaymentVerifier, UserDirectory};
use crate::steps::{ConfirmEnrollment, GrantCourseAccess, RecordPayment, StepExecutor};

/// Outcome of [`SagaOrchestrator::admit`].
#[derive(Debug, Clone)]
pub struct Admission {
    pub transaction: SagaTransaction,
    /// False when the payment transaction was already known.
    pub is_new: bool,
}

/// Counts of a [`SagaOrchestrator::resume_unfinished`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub resumed: usize,
    pub completed: usize,
    pub failed: usize,
    pub errors: usize,
}

enum StepRun {
    Succeeded,
    Failed(String),
    /// Another instance moved the transaction while this one was retrying.
    Superseded,
}

/// Drives enrollment transactions through
/// PENDING -> PAYMENT_RECORDED -> ACCESS_GRANTED -> ENROLLMENT_CONFIRMED -> COMPLETE.
///
/// Every step change is a compare-and-set on the ledger, so any number of
/// orchestrators may process the same transaction concurrently: exactly one
/// wins each transition and the others stop. A crash at any point leaves the
/// ledger at the last durable step, from which [`process`](Self::process)
/// resumes. Steps are never compensated; a transaction that cannot proceed
/// ends FAILED and raises an alert for manual reconciliation.
pub struct SagaOrchestrator<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier,
    U: UserDirectory,
    N: NotificationTransport,
{
    store: S,
    verifier: V,
    record_payment: RecordPayment<S>,
    grant_access: GrantCourseAccess<U>,
    confirm_enrollment: ConfirmEnrollment<S>,
    notifications: NotificationDispatcher<U, N>,
    policy: RetryPolicy,
    instance_id: Uuid,
}

impl<S, V, U, N> SagaOrchestrator<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier,
    U: UserDirectory + Clone,
    N: NotificationTransport,
{
    /// Creates an orchestrator with the default retry policy.
    pub fn new(store: S, verifier: V, directory: U, transport: N) -> Self {
        Self {
            record_payment: RecordPayment::new(store.clone()),
            grant_access: GrantCourseAccess::new(directory.clone()),
            confirm_enrollment: ConfirmEnrollment::new(store.clone()),
            notifications: NotificationDispatcher::new(directory, transport),
            store,
            verifier,
            policy: RetryPolicy::default(),
            instance_id: Uuid::new_v4(),
        }
    }

    /// Replaces the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Admits a payment confirmation into the workflow.
    ///
    /// A known transaction id is returned unchanged without contacting the
    /// payment provider. A new one is verified first, and the ledger entry
    /// carries the captured amount.
    #[tracing::instrument(
        skip(self, confirmation),
        fields(transaction_id = %confirmation.payment_transaction_id)
    )]
    pub async fn admit(&self, confirmation: PaymentConfirmation) -> Result<Admission> {
        let claimed = confirmation.validate()?;
        let transaction_id = confirmation.payment_transaction_id.clone();

        if let Some(existing) = self.store.get(&transaction_id).await? {
            if existing.user_id != confirmation.user_id
                || existing.course_id != confirmation.course_id
            {
                tracing::warn!(
                    user_id = %confirmation.user_id,
                    course_id = %confirmation.course_id,
                    "Replay carries different details than the admitted transaction"
                );
            }
            metrics::counter!("saga_admissions_total", "outcome" => "replay").increment(1);
            return Ok(Admission {
                transaction: existing,
                is_new: false,
            });
        }

        let capture = self
            .verifier
            .verify_capture(&confirmation)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    SagaError::ServiceUnavailable(e.to_string())
                } else {
                    SagaError::PaymentNotVerified(e.to_string())
                }
            })?;

        if capture.amount != claimed {
            metrics::counter!("saga_admissions_total", "outcome" => "rejected").increment(1);
            return Err(SagaError::AmountMismatch {
                claimed,
                verified: capture.amount,
            });
        }

        let begun = self
            .store
            .begin(NewTransaction {
                transaction_id,
                user_id: confirmation.user_id,
                course_id: confirmation.course_id,
                course_code: confirmation.course_code,
                amount: capture.amount,
            })
            .await?;

        let outcome = if begun.is_new { "new" } else { "replay" };
        metrics::counter!("saga_admissions_total", "outcome" => outcome).increment(1);
        if begun.is_new {
            tracing::info!(amount = %begun.transaction.amount, "Transaction admitted");
        }

        Ok(Admission {
            transaction: begun.transaction,
            is_new: begun.is_new,
        })
    }

    /// Loads a transaction from the ledger.
    pub async fn get_transaction(&self, transaction_id: &TransactionId) -> Result<SagaTransaction> {
        self.store
            .get(transaction_id)
            .await?
            .ok_or_else(|| SagaError::TransactionNotFound(transaction_id.clone()))
    }

    /// FAILED transactions awaiting reconciliation, oldest first.
    pub async fn list_failed(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        Ok(self.store.list_failed(limit).await?)
    }

    /// Non-terminal transactions, oldest first.
    pub async fn list_unfinished(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        Ok(self.store.list_unfinished(limit).await?)
    }

    /// Runs a transaction from its current step until it is terminal, or
    /// until another instance takes over.
    ///
    /// Returns the last observed state. Store errors that prevent recording
    /// progress are returned; the transaction stays at its last durable step.
    #[tracing::instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn process(&self, transaction_id: &TransactionId) -> Result<SagaTransaction> {
        let started = Instant::now();
        let mut tx = self.get_transaction(transaction_id).await?;

        loop {
            let from = tx.current_step;
            let Some(next) = from.next() else {
                return Ok(tx);
            };

            let (run, to) = match self.executor_for(from) {
                Some(executor) => {
                    debug_assert_eq!(executor.target(), next, "{} skips a step", executor.name());
                    (self.run_step(executor, &tx).await?, executor.target())
                }
                // ENROLLMENT_CONFIRMED -> COMPLETE has no side effect of its own.
                None => (StepRun::Succeeded, next),
            };

            match run {
                StepRun::Succeeded => match self.store.advance(transaction_id, from, to).await {
                    Ok(advanced) => {
                        tracing::info!(%from, %to, "Saga step advanced");
                        tx = advanced;
                        if to == SagaStep::Complete {
                            self.on_complete(&tx, started).await;
                            return Ok(tx);
                        }
                    }
                    Err(StoreError::StepConflict { actual, .. }) => {
                        tracing::debug!(%from, %actual, "Transition taken by another instance");
                        return self.get_transaction(transaction_id).await;
                    }
                    Err(e) => return Err(e.into()),
                },
                StepRun::Failed(reason) => return self.mark_failed(&tx, &reason).await,
                StepRun::Superseded => return self.get_transaction(transaction_id).await,
            }
        }
    }

    /// Processes every unfinished transaction in turn. Used after a restart.
    pub async fn resume_unfinished(&self, limit: usize) -> Result<ResumeReport> {
        let unfinished = self.store.list_unfinished(limit).await?;
        let mut report = ResumeReport::default();

        for tx in unfinished {
            report.resumed += 1;
            match self.process(&tx.transaction_id).await {
                Ok(done) if done.current_step == SagaStep::Complete => report.completed += 1,
                Ok(done) if done.current_step == SagaStep::Failed => report.failed += 1,
                Ok(_) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        transaction_id = %tx.transaction_id,
                        error = %e,
                        "Resuming transaction failed"
                    );
                }
            }
        }

        if report.resumed > 0 {
            tracing::info!(
                resumed = report.resumed,
                completed = report.completed,
                failed = report.failed,
                errors = report.errors,
                "Recovery sweep finished"
            );
        }
        Ok(report)
    }

    fn executor_for(&self, step: SagaStep) -> Option<&dyn StepExecutor> {
        match step {
            SagaStep::Pending => Some(&self.record_payment),
            SagaStep::PaymentRecorded => Some(&self.grant_access),
            SagaStep::AccessGranted => Some(&self.confirm_enrollment),
            _ => None,
        }
    }

    /// Executes one step with bounded retries.
    ///
    /// The budget counts failed attempts recorded on the ledger, so a resumed
    /// transaction continues where the previous run stopped.
    async fn run_step(&self, executor: &dyn StepExecutor, tx: &SagaTransaction) -> Result<StepRun> {
        let step = tx.current_step;
        let mut failed_attempts = tx.attempt_count;
        let mut last_error = tx.last_error.clone();

        loop {
            if self.policy.is_exhausted(failed_attempts) {
                return Ok(StepRun::Failed(format!(
                    "{} failed after {failed_attempts} attempts: {}",
                    executor.name(),
                    last_error.as_deref().unwrap_or("unknown error")
                )));
            }

            metrics::counter!("saga_step_attempts_total", "step" => executor.name()).increment(1);
            let outcome =
                match tokio::time::timeout(self.policy.step_timeout, executor.execute(tx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StepError::Retryable(format!(
                        "timed out after {}ms",
                        self.policy.step_timeout.as_millis()
                    ))),
                };

            let reason = match outcome {
                Ok(()) => return Ok(StepRun::Succeeded),
                Err(StepError::Fatal(reason)) => {
                    return Ok(StepRun::Failed(format!("{}: {reason}", executor.name())));
                }
                Err(StepError::Retryable(reason)) => reason,
            };

            failed_attempts += 1;
            metrics::counter!("saga_step_retries_total", "step" => executor.name()).increment(1);
            tracing::warn!(
                %step,
                attempt = failed_attempts,
                error = %reason,
                "Saga step attempt failed"
            );

            match self
                .store
                .record_attempt(&tx.transaction_id, step, &reason)
                .await
            {
                Ok(updated) => failed_attempts = updated.attempt_count,
                Err(StoreError::StepConflict { .. }) => return Ok(StepRun::Superseded),
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, "Could not record failed attempt");
                }
                Err(e) => return Err(e.into()),
            }
            last_error = Some(reason);

            if !self.policy.is_exhausted(failed_attempts) {
                tokio::time::sleep(self.policy.backoff(failed_attempts)).await;
            }
        }
    }

    async fn mark_failed(&self, tx: &SagaTransaction, reason: &str) -> Result<SagaTransaction> {
        let from = tx.current_step;
        match self.store.fail(&tx.transaction_id, from, reason).await {
            Ok(failed) => {
                metrics::counter!("saga_failed").increment(1);
                metrics::counter!("saga_alerts_total").increment(1);
                tracing::error!(
                    alert = "saga_failed",
                    transaction_id = %failed.transaction_id,
                    user_id = %failed.user_id,
                    course_id = %failed.course_id,
                    step = %from,
                    reason,
                    "Enrollment saga failed, manual reconciliation required"
                );
                Ok(failed)
            }
            Err(StoreError::StepConflict { .. }) => self.get_transaction(&tx.transaction_id).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Runs once, in the instance whose advance reached COMPLETE.
    async fn on_complete(&self, tx: &SagaTransaction, started: Instant) {
        metrics::counter!("saga_completed").increment(1);
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(
            user_id = %tx.user_id,
            course_id = %tx.course_id,
            "Enrollment saga completed"
        );

        match tokio::time::timeout(self.policy.step_timeout, self.notifications.dispatch(tx)).await
        {
            Ok(report) => {
                tracing::debug!(sent = report.sent, failed = report.failed, "Notifications dispatched");
            }
            Err(_) => tracing::warn!("Notification dispatch timed out"),
        }
    }
}

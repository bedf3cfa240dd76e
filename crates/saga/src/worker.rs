//! Background processing of admitted transactions.
//!
//! Admission returns as soon as a transaction is on the ledger; this worker
//! runs it to completion. A periodic recovery sweep picks up transactions
//! left unfinished by a crash or by a full submission queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common::TransactionId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::error::{Result, SagaError};
use crate::orchestrator::SagaOrchestrator;
use crate::services::{NotificationTransport, PaymentVerifier, UserDirectory};
use workflow_store::WorkflowStore;

/// Worker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Transactions processed at the same time.
    pub concurrency: usize,
    /// Submissions buffered before new ones are left to recovery.
    pub queue_capacity: usize,
    /// Time between recovery sweeps. The first sweep runs at startup.
    pub recovery_interval: Duration,
    /// Unfinished transactions loaded per sweep.
    pub recovery_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            queue_capacity: 1024,
            recovery_interval: Duration::from_secs(30),
            recovery_batch: 100,
        }
    }
}

/// Submits transactions to a running [`SagaWorker`].
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    sender: mpsc::Sender<TransactionId>,
}

impl WorkerHandle {
    /// Queues a transaction for processing without waiting.
    ///
    /// Returns `Ok(false)` if the queue is full; the recovery sweep will
    /// process the transaction later.
    pub fn submit(&self, transaction_id: TransactionId) -> Result<bool> {
        match self.sender.try_send(transaction_id) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(transaction_id)) => {
                tracing::warn!(%transaction_id, "Saga queue full, deferring to recovery");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => Err(SagaError::WorkerStopped),
        }
    }
}

struct Dispatcher<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier,
    U: UserDirectory,
    N: NotificationTransport,
{
    orchestrator: Arc<SagaOrchestrator<S, V, U, N>>,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<TransactionId>>>,
}

impl<S, V, U, N> Dispatcher<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier + 'static,
    U: UserDirectory + Clone + 'static,
    N: NotificationTransport + 'static,
{
    /// Spawns processing of `transaction_id` once a slot is free. A
    /// transaction already being processed by this worker is skipped.
    async fn dispatch(&self, transaction_id: TransactionId) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };

        let claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transaction_id.clone());
        if !claimed {
            tracing::trace!(%transaction_id, "Already in flight");
            return;
        }

        let orchestrator = self.orchestrator.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = orchestrator.process(&transaction_id).await {
                tracing::warn!(%transaction_id, error = %e, "Saga processing stopped");
            }
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&transaction_id);
        });
    }

    async fn sweep(&self, batch: usize) {
        match self.orchestrator.list_unfinished(batch).await {
            Ok(unfinished) => {
                if !unfinished.is_empty() {
                    tracing::info!(count = unfinished.len(), "Resuming unfinished transactions");
                }
                for tx in unfinished {
                    self.dispatch(tx.transaction_id).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Recovery sweep failed"),
        }
    }
}

/// Bounded pool running [`SagaOrchestrator::process`] for submitted and
/// recovered transactions.
pub struct SagaWorker<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier,
    U: UserDirectory,
    N: NotificationTransport,
{
    dispatcher: Dispatcher<S, V, U, N>,
    receiver: mpsc::Receiver<TransactionId>,
    config: WorkerConfig,
}

impl<S, V, U, N> SagaWorker<S, V, U, N>
where
    S: WorkflowStore,
    V: PaymentVerifier + 'static,
    U: UserDirectory + Clone + 'static,
    N: NotificationTransport + 'static,
{
    /// Creates a worker and the handle used to submit to it.
    pub fn new(
        orchestrator: Arc<SagaOrchestrator<S, V, U, N>>,
        config: WorkerConfig,
    ) -> (Self, WorkerHandle) {
        let config = WorkerConfig {
            concurrency: config.concurrency.max(1),
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let worker = Self {
            dispatcher: Dispatcher {
                orchestrator,
                semaphore: Arc::new(Semaphore::new(config.concurrency)),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
            },
            receiver,
            config,
        };
        (worker, WorkerHandle { sender })
    }

    /// Runs until `shutdown` turns true or every handle is dropped, then
    /// waits for in-flight transactions to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            dispatcher,
            mut receiver,
            config,
        } = self;

        let mut ticker = tokio::time::interval(config.recovery_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            concurrency = config.concurrency,
            recovery_interval_secs = config.recovery_interval.as_secs(),
            "Saga worker started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => dispatcher.sweep(config.recovery_batch).await,
                received = receiver.recv() => match received {
                    Some(transaction_id) => dispatcher.dispatch(transaction_id).await,
                    None => break,
                },
            }
        }

        let permits = u32::try_from(config.concurrency).unwrap_or(u32::MAX);
        let _drained = dispatcher.semaphore.acquire_many(permits).await;
        tracing::info!("Saga worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use domain::{PaymentConfirmation, SagaStep};
    use workflow_store::{IdempotencyLedger, InMemoryStore};

    use super::*;
    use crate::retry::RetryPolicy;
    use crate::services::{
        InMemoryNotificationTransport, InMemoryPaymentVerifier, InMemoryUserDirectory, UserProfile,
    };

    type TestOrchestrator = SagaOrchestrator<
        InMemoryStore,
        InMemoryPaymentVerifier,
        InMemoryUserDirectory,
        InMemoryNotificationTransport,
    >;

    fn orchestrator(store: InMemoryStore) -> Arc<TestOrchestrator> {
        let directory = InMemoryUserDirectory::new();
        directory.add_user(UserProfile::new("u1", "Ada"));
        Arc::new(
            SagaOrchestrator::new(
                store,
                InMemoryPaymentVerifier::permissive(),
                directory,
                InMemoryNotificationTransport::new(),
            )
            .with_policy(RetryPolicy {
                initial_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            }),
        )
    }

    fn confirmation(id: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            payment_transaction_id: id.into(),
            user_id: "u1".into(),
            course_id: format!("course-{id}").into(),
            course_code: "CS101".to_string(),
            amount: 10.0,
        }
    }

    async fn wait_for_complete(store: &InMemoryStore, id: &str) -> SagaStep {
        let id = TransactionId::from(id);
        for _ in 0..200 {
            let step = store.get(&id).await.unwrap().unwrap().current_step;
            if step.is_terminal() {
                return step;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transaction {id} did not finish");
    }

    #[tokio::test]
    async fn test_submitted_transactions_complete() {
        let store = InMemoryStore::new();
        let orchestrator = orchestrator(store.clone());
        let (worker, handle) = SagaWorker::new(
            orchestrator.clone(),
            WorkerConfig {
                recovery_interval: Duration::from_secs(3600),
                ..WorkerConfig::default()
            },
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(worker.run(shutdown_rx));

        for id in ["tx-1", "tx-2", "tx-3"] {
            orchestrator.admit(confirmation(id)).await.unwrap();
            assert!(handle.submit(id.into()).unwrap());
        }
        for id in ["tx-1", "tx-2", "tx-3"] {
            assert_eq!(wait_for_complete(&store, id).await, SagaStep::Complete);
        }

        shutdown_tx.send(true).unwrap();
        running.await.unwrap();
        assert!(handle.submit("tx-4".into()).is_err());
    }

    #[tokio::test]
    async fn test_recovery_sweep_resumes_at_startup() {
        let store = InMemoryStore::new();
        let orchestrator = orchestrator(store.clone());
        orchestrator.admit(confirmation("tx-1")).await.unwrap();

        let (worker, _handle) = SagaWorker::new(orchestrator, WorkerConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(worker.run(shutdown_rx));

        assert_eq!(wait_for_complete(&store, "tx-1").await, SagaStep::Complete);

        shutdown_tx.send(true).unwrap();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_defers_submission() {
        let store = InMemoryStore::new();
        let (_worker, handle) = SagaWorker::new(
            orchestrator(store),
            WorkerConfig {
                queue_capacity: 1,
                ..WorkerConfig::default()
            },
        );

        assert!(handle.submit("tx-1".into()).unwrap());
        assert!(!handle.submit("tx-2".into()).unwrap());
    }
}

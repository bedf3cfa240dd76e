use common::TransactionId;
use domain::SagaStep;
use thiserror::Error;

/// Errors that can occur when interacting with the workflow store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A compare-and-set on the current step lost: the stored step differs
    /// from the expected one.
    #[error("Step conflict for transaction {transaction_id}: expected {expected}, found {actual}")]
    StepConflict {
        transaction_id: TransactionId,
        expected: SagaStep,
        actual: SagaStep,
    },

    /// The requested transition is not allowed by the workflow.
    #[error("Invalid step transition: {from} -> {to}")]
    InvalidTransition { from: SagaStep, to: SagaStep },

    /// No ledger entry exists for the transaction.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The store is temporarily unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to the data model.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(sqlx::Error::Database(e)) => {
                e.code().is_some_and(|code| is_transient_sqlstate(&code))
            }
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

/// SQLSTATEs a retry can outlive: connection exceptions (class 08),
/// serialization failures and deadlocks, too many connections, and server
/// shutdown or startup (57P01-57P03).
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08")
        || matches!(
            code,
            "40001" | "40P01" | "53300" | "57P01" | "57P02" | "57P03"
        )
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_transient() {
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn conflicts_are_not_transient() {
        let err = StoreError::StepConflict {
            transaction_id: TransactionId::new("tx-1"),
            expected: SagaStep::Pending,
            actual: SagaStep::PaymentRecorded,
        };
        assert!(!err.is_transient());
        assert!(!StoreError::TransactionNotFound(TransactionId::new("tx-1")).is_transient());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[derive(Debug)]
    struct PgError {
        code: &'static str,
    }

    impl std::fmt::Display for PgError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "SQLSTATE {}", self.code)
        }
    }

    impl std::error::Error for PgError {}

    impl sqlx::error::DatabaseError for PgError {
        fn message(&self) -> &str {
            "test error"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.code.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn database_error(code: &'static str) -> StoreError {
        StoreError::Database(sqlx::Error::Database(Box::new(PgError { code })))
    }

    #[test]
    fn connection_level_errors_are_transient() {
        assert!(StoreError::Database(sqlx::Error::Protocol("unexpected eof".into())).is_transient());
        let tls: Box<dyn std::error::Error + Send + Sync> = "handshake failed".into();
        assert!(StoreError::Database(sqlx::Error::Tls(tls)).is_transient());
    }

    #[test]
    fn transient_sqlstates_are_retryable() {
        for code in ["08006", "08001", "40001", "40P01", "53300", "57P01", "57P03"] {
            assert!(database_error(code).is_transient(), "{code} should be transient");
        }
    }

    #[test]
    fn constraint_and_syntax_sqlstates_are_fatal() {
        for code in ["23505", "23514", "42601", "42P01"] {
            assert!(!database_error(code).is_transient(), "{code} should not be transient");
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CourseId, TransactionId, UserId};
use domain::{
    EnrollmentRecord, Money, NewTransaction, PaymentRecord, Progress, SagaStep, SagaTransaction,
    StepTransition,
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::{
    Result, StoreError,
    store::{
        BeginResult, EnrollmentStore, IdempotencyLedger, PaymentStore, UpsertResult,
        validate_transition,
    },
};

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, course_id, course_code, amount_cents, \
     current_step, last_error, attempt_count, created_at, updated_at";

const ENROLLMENT_COLUMNS: &str =
    "user_id, course_id, course_code, progress_percentage, created_at, updated_at";

/// PostgreSQL-backed workflow store.
///
/// Uniqueness is enforced by primary keys and the `unique_user_course`
/// constraint; step transitions are conditional `UPDATE`s on `current_step`.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Workflow store migrations applied");
        Ok(())
    }

    fn parse_step(raw: &str) -> Result<SagaStep> {
        SagaStep::parse(raw).ok_or_else(|| StoreError::CorruptRow(format!("unknown step {raw}")))
    }

    fn row_to_transaction(row: &PgRow, history: Vec<StepTransition>) -> Result<SagaTransaction> {
        let attempt_count: i32 = row.try_get("attempt_count")?;
        let step: String = row.try_get("current_step")?;

        Ok(SagaTransaction {
            transaction_id: TransactionId::new(row.try_get::<String, _>("transaction_id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            course_id: CourseId::new(row.try_get::<String, _>("course_id")?),
            course_code: row.try_get("course_code")?,
            amount: Money::from_cents(row.try_get("amount_cents")?),
            current_step: Self::parse_step(&step)?,
            last_error: row.try_get("last_error")?,
            attempt_count: u32::try_from(attempt_count)
                .map_err(|_| StoreError::CorruptRow(format!("attempt_count {attempt_count}")))?,
            history,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_enrollment(row: &PgRow) -> Result<EnrollmentRecord> {
        let progress: i16 = row.try_get("progress_percentage")?;

        Ok(EnrollmentRecord {
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            course_id: CourseId::new(row.try_get::<String, _>("course_id")?),
            course_code: row.try_get("course_code")?,
            progress_percentage: Progress::new(i64::from(progress))
                .map_err(|e| StoreError::CorruptRow(e.to_string()))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: &PgRow) -> Result<PaymentRecord> {
        Ok(PaymentRecord {
            transaction_id: TransactionId::new(row.try_get::<String, _>("transaction_id")?),
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            course_id: CourseId::new(row.try_get::<String, _>("course_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    async fn load_history(&self, transaction_id: &TransactionId) -> Result<Vec<StepTransition>> {
        let rows = sqlx::query(
            r#"
            SELECT from_step, to_step, at
            FROM saga_transitions
            WHERE transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(transaction_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let from: String = row.try_get("from_step")?;
                let to: String = row.try_get("to_step")?;
                let at: DateTime<Utc> = row.try_get("at")?;
                Ok(StepTransition {
                    from: Self::parse_step(&from)?,
                    to: Self::parse_step(&to)?,
                    at,
                })
            })
            .collect()
    }

    async fn load_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaTransaction>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM saga_transactions WHERE transaction_id = $1"
        ))
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let history = self.load_history(transaction_id).await?;
                Ok(Some(Self::row_to_transaction(&row, history)?))
            }
            None => Ok(None),
        }
    }

    async fn list_by_query(&self, sql: &str, limit: usize) -> Result<Vec<SagaTransaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(sql).bind(limit).fetch_all(&self.pool).await?;

        let mut transactions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = TransactionId::new(row.try_get::<String, _>("transaction_id")?);
            let history = self.load_history(&id).await?;
            transactions.push(Self::row_to_transaction(row, history)?);
        }
        Ok(transactions)
    }

    /// Explains why a conditional update on `transaction_id` matched no row.
    async fn conflict_for(
        &self,
        executor: &mut sqlx::Transaction<'_, Postgres>,
        transaction_id: &TransactionId,
        expected: SagaStep,
    ) -> Result<StoreError> {
        let actual: Option<String> = sqlx::query_scalar(
            "SELECT current_step FROM saga_transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id.as_str())
        .fetch_optional(&mut **executor)
        .await?;

        Ok(match actual {
            Some(step) => StoreError::StepConflict {
                transaction_id: transaction_id.clone(),
                expected,
                actual: Self::parse_step(&step)?,
            },
            None => StoreError::TransactionNotFound(transaction_id.clone()),
        })
    }

    /// Conditionally moves `from -> to` and appends the audit row atomically.
    #[tracing::instrument(skip(self, error))]
    async fn transition(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        to: SagaStep,
        error: Option<&str>,
    ) -> Result<SagaTransaction> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE saga_transactions
            SET current_step = $3,
                attempt_count = CASE WHEN $3 = 'FAILED' THEN attempt_count ELSE 0 END,
                last_error = $4,
                updated_at = NOW()
            WHERE transaction_id = $1 AND current_step = $2
            "#,
        )
        .bind(transaction_id.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let conflict = self.conflict_for(&mut tx, transaction_id, from).await?;
            tx.rollback().await?;
            if matches!(conflict, StoreError::StepConflict { .. }) {
                metrics::counter!("ledger_step_conflicts_total").increment(1);
                tracing::debug!(error = %conflict, "Conditional transition lost");
            }
            return Err(conflict);
        }

        sqlx::query(
            "INSERT INTO saga_transitions (transaction_id, from_step, to_step) VALUES ($1, $2, $3)",
        )
        .bind(transaction_id.as_str())
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.load_transaction(transaction_id)
            .await?
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.clone()))
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresStore {
    #[tracing::instrument(skip(self, new), fields(transaction_id = %new.transaction_id))]
    async fn begin(&self, new: NewTransaction) -> Result<BeginResult> {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO saga_transactions
                (transaction_id, user_id, course_id, course_code, amount_cents, current_step, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $6)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(new.transaction_id.as_str())
        .bind(new.user_id.as_str())
        .bind(new.course_id.as_str())
        .bind(&new.course_code)
        .bind(new.amount.cents())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let transaction = self
            .load_transaction(&new.transaction_id)
            .await?
            .ok_or_else(|| StoreError::TransactionNotFound(new.transaction_id.clone()))?;
        if inserted == 0 {
            tracing::debug!("Ledger entry already exists");
        }

        Ok(BeginResult {
            transaction,
            is_new: inserted == 1,
        })
    }

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaTransaction>> {
        self.load_transaction(transaction_id).await
    }

    async fn advance(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        to: SagaStep,
    ) -> Result<SagaTransaction> {
        if to == SagaStep::Failed {
            return Err(StoreError::InvalidTransition { from, to });
        }
        validate_transition(from, to)?;
        self.transition(transaction_id, from, to, None).await
    }

    async fn record_attempt(
        &self,
        transaction_id: &TransactionId,
        step: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE saga_transactions
            SET attempt_count = attempt_count + 1,
                last_error = $3,
                updated_at = NOW()
            WHERE transaction_id = $1 AND current_step = $2
            "#,
        )
        .bind(transaction_id.as_str())
        .bind(step.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let conflict = self.conflict_for(&mut tx, transaction_id, step).await?;
            tx.rollback().await?;
            return Err(conflict);
        }
        tx.commit().await?;

        self.load_transaction(transaction_id)
            .await?
            .ok_or_else(|| StoreError::TransactionNotFound(transaction_id.clone()))
    }

    async fn fail(
        &self,
        transaction_id: &TransactionId,
        from: SagaStep,
        error: &str,
    ) -> Result<SagaTransaction> {
        validate_transition(from, SagaStep::Failed)?;
        self.transition(transaction_id, from, SagaStep::Failed, Some(error))
            .await
    }

    async fn list_unfinished(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        self.list_by_query(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM saga_transactions \
                 WHERE current_step NOT IN ('COMPLETE', 'FAILED') \
                 ORDER BY created_at ASC, transaction_id ASC LIMIT $1"
            ),
            limit,
        )
        .await
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<SagaTransaction>> {
        self.list_by_query(
            &format!(
                "SELECT {TRANSACTION_COLUMNS} FROM saga_transactions \
                 WHERE current_step = 'FAILED' \
                 ORDER BY created_at ASC, transaction_id ASC LIMIT $1"
            ),
            limit,
        )
        .await
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn record_payment(
        &self,
        transaction_id: &TransactionId,
        user_id: &UserId,
        course_id: &CourseId,
        amount: Money,
    ) -> Result<UpsertResult<PaymentRecord>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO payments (transaction_id, user_id, course_id, amount_cents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (transaction_id) DO NOTHING
            RETURNING transaction_id, user_id, course_id, amount_cents, recorded_at
            "#,
        )
        .bind(transaction_id.as_str())
        .bind(user_id.as_str())
        .bind(course_id.as_str())
        .bind(amount.cents())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(UpsertResult {
                record: Self::row_to_payment(&row)?,
                created: true,
            });
        }

        let record = self
            .get_payment(transaction_id)
            .await?
            .ok_or_else(|| StoreError::CorruptRow(format!("payment {transaction_id} vanished")))?;
        Ok(UpsertResult {
            record,
            created: false,
        })
    }

    async fn get_payment(&self, transaction_id: &TransactionId) -> Result<Option<PaymentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT transaction_id, user_id, course_id, amount_cents, recorded_at
            FROM payments
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_payment).transpose()
    }
}

#[async_trait]
impl EnrollmentStore for PostgresStore {
    async fn create_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        course_code: &str,
    ) -> Result<UpsertResult<EnrollmentRecord>> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO enrollments (user_id, course_id, course_code) VALUES ($1, $2, $3) \
             ON CONFLICT ON CONSTRAINT unique_user_course DO NOTHING \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(user_id.as_str())
        .bind(course_id.as_str())
        .bind(course_code)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(UpsertResult {
                record: Self::row_to_enrollment(&row)?,
                created: true,
            });
        }

        let record = self
            .get_enrollment(user_id, course_id)
            .await?
            .ok_or_else(|| {
                StoreError::CorruptRow(format!("enrollment {user_id}/{course_id} vanished"))
            })?;
        Ok(UpsertResult {
            record,
            created: false,
        })
    }

    async fn get_enrollment(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<Option<EnrollmentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 AND course_id = $2"
        ))
        .bind(user_id.as_str())
        .bind(course_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_enrollment).transpose()
    }

    async fn list_enrollments(&self, user_id: &UserId) -> Result<Vec<EnrollmentRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = $1 \
             ORDER BY created_at ASC, course_id ASC"
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_enrollment).collect()
    }

    async fn update_progress(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
        progress: Progress,
    ) -> Result<EnrollmentRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO enrollments (user_id, course_id, progress_percentage) VALUES ($1, $2, $3) \
             ON CONFLICT ON CONSTRAINT unique_user_course DO UPDATE \
             SET progress_percentage = EXCLUDED.progress_percentage, updated_at = NOW() \
             RETURNING {ENROLLMENT_COLUMNS}"
        ))
        .bind(user_id.as_str())
        .bind(course_id.as_str())
        .bind(i16::from(progress.value()))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_enrollment(&row)
    }
}

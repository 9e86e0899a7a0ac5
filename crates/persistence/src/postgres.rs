use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Fingerprint, LifecycleState, OperationId, OperationRecord, PersistenceError, Result,
    TransactionId, TransactionRecord, gateway::PersistenceGateway,
};

const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL-backed gateway implementation.
///
/// States are stored as SMALLINT codes (see [`LifecycleState::code`]).
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a new PostgreSQL gateway.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Returns every persisted transaction, oldest first.
    pub async fn list_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, state, fingerprint, created_at
            FROM transactions
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_transaction).collect()
    }

    fn decode_state(code: i16) -> Result<LifecycleState> {
        LifecycleState::from_code(code).ok_or(PersistenceError::InvalidState(code))
    }

    fn row_to_transaction(row: PgRow) -> Result<TransactionRecord> {
        Ok(TransactionRecord {
            id: TransactionId::from_uuid(row.try_get::<Uuid, _>("id")?),
            state: Self::decode_state(row.try_get("state")?)?,
            fingerprint: row
                .try_get::<Option<String>, _>("fingerprint")?
                .map(Fingerprint::new),
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_operation(row: PgRow) -> Result<OperationRecord> {
        let sequence: i32 = row.try_get("sequence_number")?;
        Ok(OperationRecord {
            id: OperationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            transaction_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("transaction_id")?),
            name: row.try_get("name")?,
            sequence_number: u32::try_from(sequence).unwrap_or_default(),
            state: Self::decode_state(row.try_get("state")?)?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
    }
}

#[async_trait]
impl PersistenceGateway for PostgresPersistence {
    #[tracing::instrument(skip(self, transaction), fields(transaction_id = %transaction.id))]
    async fn save_transaction(&self, transaction: &TransactionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, state, fingerprint, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.state.code())
        .bind(transaction.fingerprint.as_ref().map(Fingerprint::as_str))
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                return PersistenceError::DuplicateTransaction(transaction.id);
            }
            PersistenceError::Database(e)
        })?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_transaction_state(
        &self,
        transaction_id: TransactionId,
        state: LifecycleState,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE transactions SET state = $2 WHERE id = $1")
            .bind(transaction_id.as_uuid())
            .bind(state.code())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::TransactionNotFound(transaction_id));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, operation), fields(operation_id = %operation.id))]
    async fn save_operation(&self, operation: &OperationRecord) -> Result<()> {
        let sequence = i32::try_from(operation.sequence_number).map_err(|_| {
            PersistenceError::WriteRejected(format!(
                "sequence number {} out of range",
                operation.sequence_number
            ))
        })?;

        sqlx::query(
            r#"
            INSERT INTO transaction_operations (id, transaction_id, name, sequence_number, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(operation.id.as_uuid())
        .bind(operation.transaction_id.as_uuid())
        .bind(&operation.name)
        .bind(sequence)
        .bind(operation.state.code())
        .bind(operation.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                return PersistenceError::DuplicateOperation(operation.id);
            }
            PersistenceError::Database(e)
        })?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_operation_state(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
        state: LifecycleState,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transaction_operations SET state = $3 WHERE transaction_id = $1 AND id = $2",
        )
        .bind(transaction_id.as_uuid())
        .bind(operation_id.as_uuid())
        .bind(state.code())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::OperationNotFound {
                transaction_id,
                operation_id,
            });
        }
        Ok(())
    }

    async fn get_all_operations(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, name, sequence_number, state, created_at
            FROM transaction_operations
            WHERE transaction_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(transaction_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_operation).collect()
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<TransactionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, state, fingerprint, created_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(transaction_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_transaction).transpose()
    }
}

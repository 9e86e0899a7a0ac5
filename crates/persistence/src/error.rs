use thiserror::Error;

use crate::{OperationId, TransactionId};

/// Errors that can occur when reading or writing transaction records.
///
/// Any of these returned from a write means the write did not happen; callers
/// treat it as fatal and never retry.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The transaction has no persisted record.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// The operation has no persisted record for the given transaction.
    #[error("Operation {operation_id} not found in transaction {transaction_id}")]
    OperationNotFound {
        transaction_id: TransactionId,
        operation_id: OperationId,
    },

    /// A transaction record with this ID already exists.
    #[error("Transaction already persisted: {0}")]
    DuplicateTransaction(TransactionId),

    /// An operation record with this ID already exists.
    #[error("Operation already persisted: {0}")]
    DuplicateOperation(OperationId),

    /// The store refused the write.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// A stored state code could not be decoded.
    #[error("Invalid state code in store: {0}")]
    InvalidState(i16),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

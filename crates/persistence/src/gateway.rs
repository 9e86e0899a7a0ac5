use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    LifecycleState, OperationId, OperationRecord, Result, TransactionId, TransactionRecord,
    record::resume_index,
};

/// Core trait for durable transaction stores.
///
/// Every write is a single best-effort call: an `Err` means the write did not
/// happen, and callers surface it without retrying. The store is expected to
/// make each individual write atomic; nothing above it adds locking.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Writes a new transaction record.
    ///
    /// Fails with `DuplicateTransaction` if the ID is already persisted.
    async fn save_transaction(&self, transaction: &TransactionRecord) -> Result<()>;

    /// Moves a persisted transaction to a new state.
    async fn update_transaction_state(
        &self,
        transaction_id: TransactionId,
        state: LifecycleState,
    ) -> Result<()>;

    /// Writes a new operation record.
    async fn save_operation(&self, operation: &OperationRecord) -> Result<()>;

    /// Moves a persisted operation to a new state.
    async fn update_operation_state(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
        state: LifecycleState,
    ) -> Result<()>;

    /// Returns every operation of a transaction ordered by sequence number.
    ///
    /// Unknown transactions yield an empty list.
    async fn get_all_operations(&self, transaction_id: TransactionId)
    -> Result<Vec<OperationRecord>>;

    /// Retrieves a transaction record.
    ///
    /// Returns None if the transaction was never persisted.
    async fn get_transaction(&self, transaction_id: TransactionId)
    -> Result<Option<TransactionRecord>>;
}

#[async_trait]
impl<T: PersistenceGateway + ?Sized> PersistenceGateway for Arc<T> {
    async fn save_transaction(&self, transaction: &TransactionRecord) -> Result<()> {
        (**self).save_transaction(transaction).await
    }

    async fn update_transaction_state(
        &self,
        transaction_id: TransactionId,
        state: LifecycleState,
    ) -> Result<()> {
        (**self).update_transaction_state(transaction_id, state).await
    }

    async fn save_operation(&self, operation: &OperationRecord) -> Result<()> {
        (**self).save_operation(operation).await
    }

    async fn update_operation_state(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
        state: LifecycleState,
    ) -> Result<()> {
        (**self)
            .update_operation_state(transaction_id, operation_id, state)
            .await
    }

    async fn get_all_operations(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<OperationRecord>> {
        (**self).get_all_operations(transaction_id).await
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<TransactionRecord>> {
        (**self).get_transaction(transaction_id).await
    }
}

/// Extension trait providing derived queries for gateways.
#[async_trait]
pub trait PersistenceGatewayExt: PersistenceGateway {
    /// Returns the index at which the forward pass should (re)start.
    ///
    /// Among persisted operations ordered by sequence number, finds the first
    /// one that is New, Pending or Failed and returns its sequence number
    /// minus one. Returns 0 if there is none or the transaction is unknown.
    async fn get_start_operation(&self, transaction_id: TransactionId) -> Result<usize> {
        let operations = self.get_all_operations(transaction_id).await?;
        Ok(resume_index(&operations))
    }

    /// Checks if a transaction has been persisted.
    async fn transaction_exists(&self, transaction_id: TransactionId) -> Result<bool> {
        Ok(self.get_transaction(transaction_id).await?.is_some())
    }

    /// Checks if an operation has been persisted under a transaction.
    async fn operation_exists(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
    ) -> Result<bool> {
        let operations = self.get_all_operations(transaction_id).await?;
        Ok(operations.iter().any(|op| op.id == operation_id))
    }
}

// Blanket implementation for all gateway implementations
impl<T: PersistenceGateway + ?Sized> PersistenceGatewayExt for T {}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    LifecycleState, OperationId, OperationRecord, PersistenceError, Result, TransactionId,
    TransactionRecord, gateway::PersistenceGateway,
};

/// In-memory gateway implementation for testing and single-process hosts.
///
/// Behaves like the PostgreSQL gateway, including duplicate and not-found
/// errors. Writes can be forced to fail with [`InMemoryPersistence::set_fail_on_write`].
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    transactions: Arc<RwLock<HashMap<TransactionId, TransactionRecord>>>,
    operations: Arc<RwLock<HashMap<TransactionId, Vec<OperationRecord>>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryPersistence {
    /// Creates a new empty in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with `WriteRejected`.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of persisted transactions.
    pub async fn transaction_count(&self) -> usize {
        self.transactions.read().await.len()
    }

    /// Returns the number of persisted operations across all transactions.
    pub async fn operation_count(&self) -> usize {
        self.operations.read().await.values().map(Vec::len).sum()
    }

    /// Returns every persisted transaction.
    pub async fn list_transactions(&self) -> Vec<TransactionRecord> {
        let mut transactions: Vec<_> = self.transactions.read().await.values().cloned().collect();
        transactions.sort_by_key(|t| t.created_at);
        transactions
    }

    /// Clears all records.
    pub async fn clear(&self) {
        self.transactions.write().await.clear();
        self.operations.write().await.clear();
    }

    fn check_writable(&self, what: &str) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            metrics::counter!("persistence_write_failures_total").increment(1);
            return Err(PersistenceError::WriteRejected(format!(
                "in-memory store rejected {what}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryPersistence {
    async fn save_transaction(&self, transaction: &TransactionRecord) -> Result<()> {
        self.check_writable("transaction save")?;

        let mut store = self.transactions.write().await;
        if store.contains_key(&transaction.id) {
            return Err(PersistenceError::DuplicateTransaction(transaction.id));
        }
        store.insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn update_transaction_state(
        &self,
        transaction_id: TransactionId,
        state: LifecycleState,
    ) -> Result<()> {
        self.check_writable("transaction update")?;

        let mut store = self.transactions.write().await;
        let record = store
            .get_mut(&transaction_id)
            .ok_or(PersistenceError::TransactionNotFound(transaction_id))?;
        record.state = state;
        Ok(())
    }

    async fn save_operation(&self, operation: &OperationRecord) -> Result<()> {
        self.check_writable("operation save")?;

        let mut store = self.operations.write().await;
        let exists = store
            .values()
            .flatten()
            .any(|existing| existing.id == operation.id);
        if exists {
            return Err(PersistenceError::DuplicateOperation(operation.id));
        }
        store
            .entry(operation.transaction_id)
            .or_default()
            .push(operation.clone());
        Ok(())
    }

    async fn update_operation_state(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
        state: LifecycleState,
    ) -> Result<()> {
        self.check_writable("operation update")?;

        let mut store = self.operations.write().await;
        let record = store
            .get_mut(&transaction_id)
            .and_then(|ops| ops.iter_mut().find(|op| op.id == operation_id))
            .ok_or(PersistenceError::OperationNotFound {
                transaction_id,
                operation_id,
            })?;
        record.state = state;
        Ok(())
    }

    async fn get_all_operations(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<OperationRecord>> {
        let store = self.operations.read().await;
        let mut operations = store.get(&transaction_id).cloned().unwrap_or_default();
        operations.sort_by_key(|op| op.sequence_number);
        Ok(operations)
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<TransactionRecord>> {
        let store = self.transactions.read().await;
        Ok(store.get(&transaction_id).cloned())
    }
}

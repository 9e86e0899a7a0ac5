use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    LifecycleState, OperationId, OperationRecord, Result, TransactionId, TransactionRecord,
    gateway::PersistenceGateway,
};

/// Gateway that stores nothing.
///
/// Every write succeeds. Reads return a `Pending` transaction without a
/// fingerprint and three `New` operations named `test-1` to `test-3`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPersistence;

impl NullPersistence {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PersistenceGateway for NullPersistence {
    async fn save_transaction(&self, _transaction: &TransactionRecord) -> Result<()> {
        Ok(())
    }

    async fn update_transaction_state(
        &self,
        _transaction_id: TransactionId,
        _state: LifecycleState,
    ) -> Result<()> {
        Ok(())
    }

    async fn save_operation(&self, _operation: &OperationRecord) -> Result<()> {
        Ok(())
    }

    async fn update_operation_state(
        &self,
        _transaction_id: TransactionId,
        _operation_id: OperationId,
        _state: LifecycleState,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_all_operations(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<OperationRecord>> {
        Ok((1..=3u32)
            .map(|sequence| {
                OperationRecord::new(
                    OperationId::from_uuid(Uuid::from_u128(u128::from(sequence))),
                    transaction_id,
                    format!("test-{sequence}"),
                    sequence,
                )
            })
            .collect())
    }

    async fn get_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Option<TransactionRecord>> {
        Ok(Some(
            TransactionRecord::new(transaction_id, None).with_state(LifecycleState::Pending),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PersistenceGatewayExt;

    #[tokio::test]
    async fn writes_always_succeed() {
        let store = NullPersistence::new();
        let id = TransactionId::new();

        store
            .save_transaction(&TransactionRecord::new(id, None))
            .await
            .unwrap();
        store
            .update_transaction_state(id, LifecycleState::Failed)
            .await
            .unwrap();
        store
            .update_operation_state(id, OperationId::new(), LifecycleState::Completed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reads_are_canned() {
        let store = NullPersistence::new();
        let id = TransactionId::new();

        let transaction = store.get_transaction(id).await.unwrap().unwrap();
        assert_eq!(transaction.state, LifecycleState::Pending);
        assert!(transaction.fingerprint.is_none());

        let ops = store.get_all_operations(id).await.unwrap();
        let names: Vec<&str> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["test-1", "test-2", "test-3"]);
        assert!(ops.iter().all(|op| op.state == LifecycleState::New));
        assert_eq!(store.get_start_operation(id).await.unwrap(), 0);
    }
}

//! Routes lifecycle events to saga instances and publishes their transitions.

use std::collections::HashMap;

use common::{LifecycleState, OperationId, TransactionId};
use tokio::sync::RwLock;

use crate::cache::TransactionCache;
use crate::events::LifecycleEvent;
use crate::notification::Notification;
use crate::operation_saga::OperationSaga;
use crate::transaction_saga::TransactionSaga;

/// Owns every live saga instance, correlated by transaction and operation ID.
///
/// Each transition is published to the notification bus of the transaction's
/// [`TransactionHandle`](crate::TransactionHandle), found through the shared cache.
/// Sagas of different transactions never share state.
#[derive(Default)]
pub struct StateMachineHost {
    transactions: RwLock<HashMap<TransactionId, TransactionSaga>>,
    operations: RwLock<HashMap<OperationId, OperationSaga>>,
    cache: TransactionCache,
}

impl StateMachineHost {
    /// Creates a host publishing through the given cache.
    pub fn new(cache: TransactionCache) -> Self {
        Self {
            transactions: RwLock::default(),
            operations: RwLock::default(),
            cache,
        }
    }

    /// Returns the cache used to find notification buses.
    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    /// Returns a snapshot of a transaction saga.
    pub async fn transaction_saga(&self, transaction_id: TransactionId) -> Option<TransactionSaga> {
        self.transactions.read().await.get(&transaction_id).cloned()
    }

    /// Returns a snapshot of an operation saga.
    pub async fn operation_saga(&self, operation_id: OperationId) -> Option<OperationSaga> {
        self.operations.read().await.get(&operation_id).cloned()
    }

    /// Returns snapshots of every operation saga of a transaction, by sequence number.
    pub async fn operation_sagas(&self, transaction_id: TransactionId) -> Vec<OperationSaga> {
        let mut sagas: Vec<_> = self
            .operations
            .read()
            .await
            .values()
            .filter(|saga| saga.transaction_id() == transaction_id)
            .cloned()
            .collect();
        sagas.sort_by_key(OperationSaga::sequence_number);
        sagas
    }

    /// Returns the number of live sagas, transaction and operation sagas combined.
    pub async fn saga_count(&self) -> usize {
        self.transactions.read().await.len() + self.operations.read().await.len()
    }

    /// Drops the transaction saga and every operation saga of a transaction.
    ///
    /// Returns the number of sagas removed. Later events for the transaction
    /// find no saga and are dropped, except `StartTransaction`.
    #[tracing::instrument(skip(self))]
    pub async fn evict(&self, transaction_id: TransactionId) -> usize {
        let mut removed = usize::from(
            self.transactions
                .write()
                .await
                .remove(&transaction_id)
                .is_some(),
        );
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|_, saga| saga.transaction_id() != transaction_id);
        removed += before - operations.len();
        tracing::debug!(removed, "evicted sagas");
        removed
    }

    /// Feeds one event to the sagas it is correlated with.
    #[tracing::instrument(
        skip(self, event),
        fields(event_type = event.event_type(), transaction_id = %event.transaction_id())
    )]
    pub async fn dispatch(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::StartTransaction(_) | LifecycleEvent::TransactionCompleted(_) => {
                self.dispatch_to_transaction(event).await;
            }
            LifecycleEvent::RequestExecuteOperation(_)
            | LifecycleEvent::OperationCompleted(_) => {
                self.dispatch_to_operation(event).await;
            }
            LifecycleEvent::OperationFailed(_) => {
                self.dispatch_to_operation(event).await;
                self.dispatch_to_transaction(event).await;
            }
            LifecycleEvent::RequestCompensation(data) => {
                if data.operation_id.is_some() {
                    self.dispatch_to_operation(event).await;
                } else {
                    self.dispatch_to_transaction(event).await;
                }
            }
            LifecycleEvent::TransactionFailed(_) => {
                tracing::debug!("no saga consumes TransactionFailed");
            }
        }
    }

    async fn dispatch_to_transaction(&self, event: &LifecycleEvent) {
        let transaction_id = event.transaction_id();

        let transition = {
            let mut sagas = self.transactions.write().await;
            let saga = match event {
                LifecycleEvent::StartTransaction(_) => sagas
                    .entry(transaction_id)
                    .or_insert_with(|| TransactionSaga::new(transaction_id)),
                _ => match sagas.get_mut(&transaction_id) {
                    Some(saga) => saga,
                    None => {
                        tracing::debug!("no transaction saga for event");
                        return;
                    }
                },
            };
            saga.handle(event)
        };

        if let Some(state) = transition.entered() {
            record_transition("transaction", state);
            tracing::debug!(%state, "transaction saga transitioned");
            self.notify(Notification::transaction(transaction_id, state))
                .await;
        }
    }

    async fn dispatch_to_operation(&self, event: &LifecycleEvent) {
        let Some(operation_id) = event.operation_id() else {
            return;
        };

        let (transition, transaction_id, name) = {
            let mut sagas = self.operations.write().await;
            let saga = match event {
                LifecycleEvent::RequestExecuteOperation(data) => {
                    sagas.entry(operation_id).or_insert_with(|| {
                        OperationSaga::new(
                            data.transaction_id,
                            operation_id,
                            &data.name,
                            data.sequence_number,
                        )
                    })
                }
                _ => match sagas.get_mut(&operation_id) {
                    Some(saga) => saga,
                    None => {
                        tracing::debug!(%operation_id, "no operation saga for event");
                        return;
                    }
                },
            };
            let transition = saga.handle(event);
            (transition, saga.transaction_id(), saga.name().to_string())
        };

        let Some(state) = transition.entered() else {
            tracing::debug!(%operation_id, operation = %name, "operation saga ignored event");
            return;
        };
        record_transition("operation", state);
        tracing::debug!(%operation_id, operation = %name, %state, "operation saga transitioned");
        self.notify(Notification::operation(
            transaction_id,
            operation_id,
            name,
            state,
        ))
        .await;
    }

    async fn notify(&self, notification: Notification) {
        match self.cache.get(notification.transaction_id()).await {
            Some(handle) => handle.notifications.publish(&notification).await,
            None => tracing::debug!(%notification, "transaction not registered, notification dropped"),
        }
    }
}

fn record_transition(saga: &'static str, state: LifecycleState) {
    metrics::counter!("saga_transitions_total", "saga" => saga, "state" => state.as_str())
        .increment(1);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::TransactionHandle;
    use crate::notification::{ChannelObserver, NotificationBus, Signal};

    type Receiver = tokio::sync::mpsc::UnboundedReceiver<Signal>;

    async fn registered_host() -> (StateMachineHost, TransactionId, Receiver) {
        let cache = TransactionCache::new();
        let tx = TransactionId::new();
        let bus = NotificationBus::new();
        let (observer, rx) = ChannelObserver::channel();
        let _subscription = bus.subscribe(Arc::new(observer)).await;
        cache
            .store(TransactionHandle::new(tx, None, vec!["A".into()], bus))
            .await;
        (StateMachineHost::new(cache), tx, rx)
    }

    fn drain(rx: &mut Receiver) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            match signal {
                Signal::Next(n) => seen.push(n.to_string()),
                Signal::Error(f) => seen.push(format!("!{}", f.notification)),
                Signal::Completed => seen.push("done".into()),
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_failure_routes_operation_then_transaction() {
        let (host, tx, mut rx) = registered_host().await;
        let op = OperationId::new();

        host.dispatch(&LifecycleEvent::start_transaction(tx)).await;
        host.dispatch(&LifecycleEvent::request_execute_operation(tx, op, "A", 1))
            .await;
        host.dispatch(&LifecycleEvent::operation_failed(tx, op, "A", "boom"))
            .await;
        host.dispatch(&LifecycleEvent::transaction_failed(tx, "boom"))
            .await;
        host.dispatch(&LifecycleEvent::request_operation_compensation(tx, op))
            .await;
        host.dispatch(&LifecycleEvent::request_transaction_compensation(tx))
            .await;

        assert_eq!(
            drain(&mut rx),
            vec![
                "Transaction:Pending",
                "Pending(A)",
                "!Failed(A)",
                "!Transaction:Failed",
                "Compensated(A)",
                "Transaction:Compensated",
            ]
        );
        assert_eq!(
            host.transaction_saga(tx).await.unwrap().state(),
            LifecycleState::Compensated
        );
        assert_eq!(
            host.operation_saga(op).await.unwrap().state(),
            LifecycleState::Compensated
        );
    }

    #[tokio::test]
    async fn test_events_without_saga_are_dropped() {
        let (host, tx, mut rx) = registered_host().await;

        host.dispatch(&LifecycleEvent::operation_completed(tx, OperationId::new(), "A"))
            .await;
        host.dispatch(&LifecycleEvent::transaction_completed(tx))
            .await;

        assert!(drain(&mut rx).is_empty());
        assert!(host.transaction_saga(tx).await.is_none());
    }

    #[tokio::test]
    async fn test_unregistered_transaction_still_transitions() {
        let host = StateMachineHost::new(TransactionCache::new());
        let tx = TransactionId::new();

        host.dispatch(&LifecycleEvent::start_transaction(tx)).await;

        assert_eq!(
            host.transaction_saga(tx).await.unwrap().state(),
            LifecycleState::Pending
        );
    }

    #[tokio::test]
    async fn test_evict_drops_only_the_transactions_sagas() {
        let (host, tx, mut rx) = registered_host().await;
        let other = TransactionId::new();
        let op = OperationId::new();

        host.dispatch(&LifecycleEvent::start_transaction(tx)).await;
        host.dispatch(&LifecycleEvent::request_execute_operation(tx, op, "A", 1))
            .await;
        host.dispatch(&LifecycleEvent::request_execute_operation(
            tx,
            OperationId::new(),
            "B",
            2,
        ))
        .await;
        host.dispatch(&LifecycleEvent::start_transaction(other)).await;
        assert_eq!(host.saga_count().await, 4);

        assert_eq!(host.evict(tx).await, 3);
        assert_eq!(host.saga_count().await, 1);
        assert!(host.transaction_saga(tx).await.is_none());
        assert!(host.operation_sagas(tx).await.is_empty());
        assert!(host.transaction_saga(other).await.is_some());
        assert_eq!(host.evict(tx).await, 0);

        drain(&mut rx);
        host.dispatch(&LifecycleEvent::operation_completed(tx, op, "A"))
            .await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_operation_sagas_are_listed_by_sequence() {
        let (host, tx, _rx) = registered_host().await;
        let second = OperationId::new();
        let first = OperationId::new();

        host.dispatch(&LifecycleEvent::request_execute_operation(tx, second, "B", 2))
            .await;
        host.dispatch(&LifecycleEvent::request_execute_operation(tx, first, "A", 1))
            .await;

        let names: Vec<String> = host
            .operation_sagas(tx)
            .await
            .iter()
            .map(|saga| saga.name().to_string())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}

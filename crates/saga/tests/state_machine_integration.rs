//! Integration tests for the state-machine layer driven through event channels.

use std::sync::Arc;

use common::{LifecycleState, OperationId, TransactionId};
use saga::{
    ChannelObserver, EventChannel, InProcessChannel, LifecycleEvent, NotificationBus,
    QueuedChannel, Signal, StateMachineHost, TransactionCache, TransactionHandle,
};
use tokio::sync::mpsc::UnboundedReceiver;

struct TestHarness {
    host: Arc<StateMachineHost>,
    channel: InProcessChannel,
    transaction_id: TransactionId,
    signals: UnboundedReceiver<Signal>,
}

impl TestHarness {
    async fn new(names: &[&str]) -> Self {
        let cache = TransactionCache::new();
        let transaction_id = TransactionId::new();
        let bus = NotificationBus::new();
        let (observer, signals) = ChannelObserver::channel();
        let _subscription = bus.subscribe(Arc::new(observer)).await;
        cache
            .store(TransactionHandle::new(
                transaction_id,
                None,
                names.iter().map(|n| n.to_string()).collect(),
                bus,
            ))
            .await;

        let host = Arc::new(StateMachineHost::new(cache));
        let channel = InProcessChannel::new(Arc::clone(&host));

        Self {
            host,
            channel,
            transaction_id,
            signals,
        }
    }

    async fn publish(&self, event: LifecycleEvent) {
        self.channel.publish(event).await.unwrap();
    }

    async fn run_operation(&self, id: OperationId, name: &str, sequence: u32, succeed: bool) {
        let tx = self.transaction_id;
        self.publish(LifecycleEvent::request_execute_operation(
            tx, id, name, sequence,
        ))
        .await;
        if succeed {
            self.publish(LifecycleEvent::operation_completed(tx, id, name))
                .await;
        } else {
            self.publish(LifecycleEvent::operation_failed(tx, id, name, "failed"))
                .await;
        }
    }

    fn drain(&mut self) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(signal) = self.signals.try_recv() {
            seen.push(match signal {
                Signal::Next(n) => n.to_string(),
                Signal::Error(f) => format!("error:{}", f.notification),
                Signal::Completed => "completed".to_string(),
            });
        }
        seen
    }
}

#[tokio::test]
async fn test_successful_transaction_notifications() {
    let mut h = TestHarness::new(&["A", "B"]).await;
    let tx = h.transaction_id;
    let (a, b) = (OperationId::new(), OperationId::new());

    h.publish(LifecycleEvent::start_transaction(tx)).await;
    h.run_operation(a, "A", 1, true).await;
    h.run_operation(b, "B", 2, true).await;
    h.publish(LifecycleEvent::transaction_completed(tx)).await;

    assert_eq!(
        h.drain(),
        vec![
            "Transaction:Pending",
            "Pending(A)",
            "Completed(A)",
            "Pending(B)",
            "Completed(B)",
            "Transaction:Completed",
        ]
    );
}

#[tokio::test]
async fn test_failure_and_compensation_notifications() {
    let mut h = TestHarness::new(&["A", "B", "C"]).await;
    let tx = h.transaction_id;
    let ids = [OperationId::new(), OperationId::new(), OperationId::new()];

    h.publish(LifecycleEvent::start_transaction(tx)).await;
    h.run_operation(ids[0], "A", 1, true).await;
    h.run_operation(ids[1], "B", 2, true).await;
    h.run_operation(ids[2], "C", 3, false).await;
    h.publish(LifecycleEvent::transaction_failed(tx, "C failed"))
        .await;
    for id in ids.iter().rev() {
        h.publish(LifecycleEvent::request_operation_compensation(tx, *id))
            .await;
    }
    h.publish(LifecycleEvent::request_transaction_compensation(tx))
        .await;

    assert_eq!(
        h.drain(),
        vec![
            "Transaction:Pending",
            "Pending(A)",
            "Completed(A)",
            "Pending(B)",
            "Completed(B)",
            "Pending(C)",
            "error:Failed(C)",
            "error:Transaction:Failed",
            "Compensated(C)",
            "Compensated(B)",
            "Compensated(A)",
            "Transaction:Compensated",
        ]
    );

    for id in ids {
        assert_eq!(
            h.host.operation_saga(id).await.unwrap().state(),
            LifecycleState::Compensated
        );
    }
}

#[tokio::test]
async fn test_late_events_after_compensation_are_absorbed() {
    let mut h = TestHarness::new(&["A", "B"]).await;
    let tx = h.transaction_id;
    let (a, b) = (OperationId::new(), OperationId::new());

    h.publish(LifecycleEvent::start_transaction(tx)).await;
    h.run_operation(a, "A", 1, true).await;
    h.run_operation(b, "B", 2, false).await;
    h.publish(LifecycleEvent::transaction_failed(tx, "B failed"))
        .await;
    h.publish(LifecycleEvent::request_operation_compensation(tx, b))
        .await;
    h.publish(LifecycleEvent::request_operation_compensation(tx, a))
        .await;
    h.publish(LifecycleEvent::request_transaction_compensation(tx))
        .await;
    h.drain();

    for event in [
        LifecycleEvent::operation_completed(tx, a, "A"),
        LifecycleEvent::operation_failed(tx, b, "B", "late"),
        LifecycleEvent::request_operation_compensation(tx, a),
        LifecycleEvent::request_operation_compensation(tx, b),
        LifecycleEvent::transaction_completed(tx),
        LifecycleEvent::request_transaction_compensation(tx),
    ] {
        h.publish(event).await;
    }

    assert!(h.drain().is_empty());
    assert_eq!(
        h.host.transaction_saga(tx).await.unwrap().state(),
        LifecycleState::Compensated
    );
}

#[tokio::test]
async fn test_redelivered_events_produce_no_duplicate_notifications() {
    let mut h = TestHarness::new(&["A"]).await;
    let tx = h.transaction_id;
    let a = OperationId::new();

    h.publish(LifecycleEvent::start_transaction(tx)).await;
    h.run_operation(a, "A", 1, true).await;
    h.publish(LifecycleEvent::transaction_completed(tx)).await;
    h.drain();

    // At-least-once delivery: replay everything
    h.publish(LifecycleEvent::start_transaction(tx)).await;
    h.run_operation(a, "A", 1, true).await;
    h.run_operation(a, "A", 1, false).await;
    h.publish(LifecycleEvent::transaction_completed(tx)).await;

    assert!(h.drain().is_empty());
    assert_eq!(
        h.host.transaction_saga(tx).await.unwrap().state(),
        LifecycleState::Completed
    );
}

#[tokio::test]
async fn test_concurrent_transactions_are_isolated() {
    let cache = TransactionCache::new();
    let host = Arc::new(StateMachineHost::new(cache));
    let channel = InProcessChannel::new(Arc::clone(&host));

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let channel = channel.clone();
        tasks.push(tokio::spawn(async move {
            let tx = TransactionId::new();
            let op = OperationId::new();
            channel
                .publish(LifecycleEvent::start_transaction(tx))
                .await
                .unwrap();
            channel
                .publish(LifecycleEvent::request_execute_operation(tx, op, "step", 1))
                .await
                .unwrap();
            if i % 2 == 0 {
                channel
                    .publish(LifecycleEvent::operation_completed(tx, op, "step"))
                    .await
                    .unwrap();
                channel
                    .publish(LifecycleEvent::transaction_completed(tx))
                    .await
                    .unwrap();
                (tx, LifecycleState::Completed)
            } else {
                channel
                    .publish(LifecycleEvent::operation_failed(tx, op, "step", "x"))
                    .await
                    .unwrap();
                (tx, LifecycleState::Failed)
            }
        }));
    }

    for task in tasks {
        let (tx, expected) = task.await.unwrap();
        assert_eq!(host.transaction_saga(tx).await.unwrap().state(), expected);
    }
}

#[tokio::test]
async fn test_queued_channel_preserves_order() {
    let mut h = TestHarness::new(&["A"]).await;
    let tx = h.transaction_id;
    let a = OperationId::new();
    let (channel, consumer) = QueuedChannel::spawn(Arc::clone(&h.host));

    for event in [
        LifecycleEvent::start_transaction(tx),
        LifecycleEvent::request_execute_operation(tx, a, "A", 1),
        LifecycleEvent::operation_completed(tx, a, "A"),
        LifecycleEvent::transaction_completed(tx),
    ] {
        channel.publish(event).await.unwrap();
    }
    drop(channel);
    consumer.await.unwrap();

    assert_eq!(
        h.drain(),
        vec![
            "Transaction:Pending",
            "Pending(A)",
            "Completed(A)",
            "Transaction:Completed",
        ]
    );
}

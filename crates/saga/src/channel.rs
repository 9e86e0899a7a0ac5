//! Transports carrying lifecycle events to the state-machine layer.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ChannelError, Result};
use crate::events::LifecycleEvent;
use crate::host::StateMachineHost;

/// Fire-and-forget publication of lifecycle events.
///
/// Implementations must deliver every event at least once and preserve
/// publication order per transaction.
#[async_trait]
pub trait EventChannel: Send + Sync {
    async fn publish(&self, event: LifecycleEvent) -> Result<()>;

    /// Waits until every event published before this call has been dispatched.
    async fn flush(&self) -> Result<()>;
}

#[async_trait]
impl<T: EventChannel + ?Sized> EventChannel for Arc<T> {
    async fn publish(&self, event: LifecycleEvent) -> Result<()> {
        (**self).publish(event).await
    }

    async fn flush(&self) -> Result<()> {
        (**self).flush().await
    }
}

/// Dispatches each event to the host before `publish` returns.
///
/// Saga notifications therefore interleave with the caller's own in exact
/// publication order.
#[derive(Clone)]
pub struct InProcessChannel {
    host: Arc<StateMachineHost>,
}

impl InProcessChannel {
    pub fn new(host: Arc<StateMachineHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<StateMachineHost> {
        &self.host
    }
}

#[async_trait]
impl EventChannel for InProcessChannel {
    async fn publish(&self, event: LifecycleEvent) -> Result<()> {
        self.host.dispatch(&event).await;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

enum Queued {
    Event(LifecycleEvent),
    Flush(oneshot::Sender<()>),
}

/// Queues events for a background consumer task.
///
/// The consumer stops once every clone of the channel has been dropped.
#[derive(Clone)]
pub struct QueuedChannel {
    sender: mpsc::UnboundedSender<Queued>,
}

impl QueuedChannel {
    /// Spawns the consumer task feeding `host`.
    pub fn spawn(host: Arc<StateMachineHost>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Queued>();

        let consumer = tokio::spawn(async move {
            while let Some(item) = receiver.recv().await {
                match item {
                    Queued::Event(event) => host.dispatch(&event).await,
                    Queued::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
            tracing::debug!("event channel consumer stopped");
        });

        (Self { sender }, consumer)
    }
}

#[async_trait]
impl EventChannel for QueuedChannel {
    async fn publish(&self, event: LifecycleEvent) -> Result<()> {
        self.sender
            .send(Queued::Event(event))
            .map_err(|_| ChannelError::Closed)
    }

    async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.sender
            .send(Queued::Flush(ack))
            .map_err(|_| ChannelError::Closed)?;
        done.await.map_err(|_| ChannelError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use common::{LifecycleState, TransactionId};

    use super::*;
    use crate::cache::TransactionCache;

    #[tokio::test]
    async fn test_in_process_dispatches_before_returning() {
        let host = Arc::new(StateMachineHost::new(TransactionCache::new()));
        let channel = InProcessChannel::new(Arc::clone(&host));
        let tx = TransactionId::new();

        channel
            .publish(LifecycleEvent::start_transaction(tx))
            .await
            .unwrap();

        assert_eq!(
            host.transaction_saga(tx).await.unwrap().state(),
            LifecycleState::Pending
        );
    }

    #[tokio::test]
    async fn test_queued_channel_delivers_in_order() {
        let host = Arc::new(StateMachineHost::new(TransactionCache::new()));
        let (channel, consumer) = QueuedChannel::spawn(Arc::clone(&host));
        let tx = TransactionId::new();

        channel
            .publish(LifecycleEvent::start_transaction(tx))
            .await
            .unwrap();
        channel
            .publish(LifecycleEvent::transaction_completed(tx))
            .await
            .unwrap();

        drop(channel);
        consumer.await.unwrap();

        assert_eq!(
            host.transaction_saga(tx).await.unwrap().state(),
            LifecycleState::Completed
        );
    }

    #[tokio::test]
    async fn test_queued_flush_waits_for_dispatch() {
        let host = Arc::new(StateMachineHost::new(TransactionCache::new()));
        let (channel, _consumer) = QueuedChannel::spawn(Arc::clone(&host));
        let tx = TransactionId::new();

        channel
            .publish(LifecycleEvent::start_transaction(tx))
            .await
            .unwrap();
        channel
            .publish(LifecycleEvent::transaction_completed(tx))
            .await
            .unwrap();
        channel.flush().await.unwrap();

        assert_eq!(
            host.transaction_saga(tx).await.unwrap().state(),
            LifecycleState::Completed
        );
    }

    #[tokio::test]
    async fn test_queued_channel_reports_closed() {
        let host = Arc::new(StateMachineHost::new(TransactionCache::new()));
        let (channel, consumer) = QueuedChannel::spawn(host);
        consumer.abort();
        let _ = consumer.await;

        let result = channel
            .publish(LifecycleEvent::start_transaction(TransactionId::new()))
            .await;
        assert!(matches!(result, Err(ChannelError::Closed)));
        assert!(matches!(channel.flush().await, Err(ChannelError::Closed)));
    }
}

//! In-process publish/subscribe of lifecycle state changes.
//!
//! Notifications are ephemeral and best-effort: they are delivered to the
//! observers subscribed at the time of publication and never persisted.
//! `Failed` is delivered through [`Observer::on_error`], every other state
//! through [`Observer::on_next`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::{LifecycleState, OperationId, TransactionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};

/// State of a transaction at the moment it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    pub transaction_id: TransactionId,
    pub state: LifecycleState,
}

/// State of an operation at the moment it changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub transaction_id: TransactionId,
    pub operation_id: OperationId,
    pub name: String,
    pub state: LifecycleState,
}

/// A state-change value delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Transaction(TransactionContext),
    Operation(OperationContext),
}

impl Notification {
    /// Creates a transaction notification.
    pub fn transaction(transaction_id: TransactionId, state: LifecycleState) -> Self {
        Notification::Transaction(TransactionContext {
            transaction_id,
            state,
        })
    }

    /// Creates an operation notification.
    pub fn operation(
        transaction_id: TransactionId,
        operation_id: OperationId,
        name: impl Into<String>,
        state: LifecycleState,
    ) -> Self {
        Notification::Operation(OperationContext {
            transaction_id,
            operation_id,
            name: name.into(),
            state,
        })
    }

    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Notification::Transaction(ctx) => ctx.transaction_id,
            Notification::Operation(ctx) => ctx.transaction_id,
        }
    }

    /// The state being entered.
    pub fn state(&self) -> LifecycleState {
        match self {
            Notification::Transaction(ctx) => ctx.state,
            Notification::Operation(ctx) => ctx.state,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Transaction(ctx) => {
                write!(f, "Transaction:{}", ctx.state)
            }
            Notification::Operation(ctx) => write!(f, "{}({})", ctx.state, ctx.name),
        }
    }
}

/// Error signal delivered when a transaction or operation enters `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{notification} entered the Failed state")]
pub struct StateFailure {
    pub notification: Notification,
}

/// Receiver of state-change notifications.
///
/// Callbacks run inline on the publishing task and must not block.
pub trait Observer: Send + Sync {
    /// Called for every non-failure state change.
    fn on_next(&self, notification: &Notification);

    /// Called when a transaction or operation enters `Failed`.
    fn on_error(&self, failure: &StateFailure);

    /// Called once when the transaction finishes, after which the observer is dropped.
    fn on_completed(&self) {}
}

type ObserverList = Vec<(u64, Arc<dyn Observer>)>;

/// Subscriber list for one transaction.
#[derive(Clone, Default)]
pub struct NotificationBus {
    observers: Arc<RwLock<ObserverList>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer, returning a handle that removes it again.
    pub async fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().await.push((id, observer));
        Subscription {
            id,
            bus: self.clone(),
        }
    }

    /// Delivers a notification to every current observer.
    pub async fn publish(&self, notification: &Notification) {
        let observers = self.snapshot().await;
        metrics::counter!("notifications_published_total").increment(1);

        if notification.state().is_failure() {
            let failure = StateFailure {
                notification: notification.clone(),
            };
            for observer in &observers {
                observer.on_error(&failure);
            }
        } else {
            for observer in &observers {
                observer.on_next(notification);
            }
        }
    }

    /// Sends the terminal completion signal and clears the subscriber list.
    pub async fn complete(&self) {
        let observers: ObserverList = std::mem::take(&mut *self.observers.write().await);
        for (_, observer) in observers {
            observer.on_completed();
        }
    }

    /// Returns the number of subscribed observers.
    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .read()
            .await
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    async fn remove(&self, id: u64) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }
}

/// Unsubscribe handle returned by [`NotificationBus::subscribe`].
#[must_use = "dropping a Subscription keeps the observer subscribed"]
pub struct Subscription {
    id: u64,
    bus: NotificationBus,
}

impl Subscription {
    /// Removes the observer. Returns false if it was already gone.
    pub async fn unsubscribe(self) -> bool {
        self.bus.remove(self.id).await
    }
}

/// Signal forwarded by a [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Next(Notification),
    Error(StateFailure),
    Completed,
}

/// Observer that forwards every signal into an unbounded mpsc channel.
#[derive(Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<Signal>,
}

impl ChannelObserver {
    /// Creates an observer and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Signal>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Observer for ChannelObserver {
    fn on_next(&self, notification: &Notification) {
        // Receiver gone means nobody is listening anymore
        let _ = self.sender.send(Signal::Next(notification.clone()));
    }

    fn on_error(&self, failure: &StateFailure) {
        let _ = self.sender.send(Signal::Error(failure.clone()));
    }

    fn on_completed(&self) {
        let _ = self.sender.send(Signal::Completed);
    }
}

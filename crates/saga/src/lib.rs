//! State-machine layer for saga transactions.
//!
//! Lifecycle events published on an [`EventChannel`] are routed by the
//! [`StateMachineHost`] to one [`TransactionSaga`] per transaction and one
//! [`OperationSaga`] per operation. Every transition is published as a
//! [`Notification`] on the transaction's [`NotificationBus`], found through
//! the shared [`TransactionCache`].

pub mod cache;
pub mod channel;
pub mod error;
pub mod events;
pub mod host;
pub mod notification;
pub mod operation_saga;
pub mod state;
pub mod transaction_saga;

pub use cache::{TransactionCache, TransactionHandle};
pub use channel::{EventChannel, InProcessChannel, QueuedChannel};
pub use error::ChannelError;
pub use events::LifecycleEvent;
pub use host::StateMachineHost;
pub use notification::{
    ChannelObserver, Notification, NotificationBus, Observer, OperationContext, Signal,
    StateFailure, Subscription, TransactionContext,
};
pub use operation_saga::OperationSaga;
pub use state::Transition;
pub use transaction_saga::TransactionSaga;

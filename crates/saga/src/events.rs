//! Lifecycle events consumed by the state-machine layer.

use chrono::{DateTime, Utc};
use common::{OperationId, TransactionId};
use serde::{Deserialize, Serialize};

/// Messages published on an [`EventChannel`](crate::EventChannel).
///
/// Each message is correlated to a saga instance by its transaction ID and,
/// where present, its operation ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    /// The forward pass of a transaction is starting.
    StartTransaction(TransactionData),

    /// An operation is about to run its work.
    RequestExecuteOperation(OperationRequestData),

    /// An operation's work succeeded.
    OperationCompleted(OperationData),

    /// An operation's work reported failure or errored.
    OperationFailed(OperationFailedData),

    /// Compensation was requested for one operation, or for the whole
    /// transaction when no operation ID is set.
    RequestCompensation(CompensationData),

    /// Every operation of the transaction completed.
    TransactionCompleted(TransactionData),

    /// The forward pass stopped at a failed operation.
    TransactionFailed(TransactionFailedData),
}

impl LifecycleEvent {
    /// Returns the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::StartTransaction(_) => "StartTransaction",
            LifecycleEvent::RequestExecuteOperation(_) => "RequestExecuteOperation",
            LifecycleEvent::OperationCompleted(_) => "OperationCompleted",
            LifecycleEvent::OperationFailed(_) => "OperationFailed",
            LifecycleEvent::RequestCompensation(_) => "RequestCompensation",
            LifecycleEvent::TransactionCompleted(_) => "TransactionCompleted",
            LifecycleEvent::TransactionFailed(_) => "TransactionFailed",
        }
    }

    /// Returns the transaction this event is correlated to.
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            LifecycleEvent::StartTransaction(data) | LifecycleEvent::TransactionCompleted(data) => {
                data.transaction_id
            }
            LifecycleEvent::RequestExecuteOperation(data) => data.transaction_id,
            LifecycleEvent::OperationCompleted(data) => data.transaction_id,
            LifecycleEvent::OperationFailed(data) => data.transaction_id,
            LifecycleEvent::RequestCompensation(data) => data.transaction_id,
            LifecycleEvent::TransactionFailed(data) => data.transaction_id,
        }
    }

    /// Returns the operation this event is correlated to, if it is operation-scoped.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            LifecycleEvent::RequestExecuteOperation(data) => Some(data.operation_id),
            LifecycleEvent::OperationCompleted(data) => Some(data.operation_id),
            LifecycleEvent::OperationFailed(data) => Some(data.operation_id),
            LifecycleEvent::RequestCompensation(data) => data.operation_id,
            _ => None,
        }
    }

    /// Returns the time the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::StartTransaction(data) | LifecycleEvent::TransactionCompleted(data) => {
                data.timestamp
            }
            LifecycleEvent::RequestExecuteOperation(data) => data.timestamp,
            LifecycleEvent::OperationCompleted(data) => data.timestamp,
            LifecycleEvent::OperationFailed(data) => data.timestamp,
            LifecycleEvent::RequestCompensation(data) => data.timestamp,
            LifecycleEvent::TransactionFailed(data) => data.timestamp,
        }
    }
}

/// Data for transaction-scoped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionData {
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
}

/// Data for RequestExecuteOperation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequestData {
    pub transaction_id: TransactionId,
    pub operation_id: OperationId,
    /// Operation name, checked by the executability guard.
    pub name: String,
    /// 1-based position within the transaction.
    pub sequence_number: u32,
    pub timestamp: DateTime<Utc>,
}

/// Data for OperationCompleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationData {
    pub transaction_id: TransactionId,
    pub operation_id: OperationId,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// Data for OperationFailed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailedData {
    pub transaction_id: TransactionId,
    pub operation_id: OperationId,
    pub name: String,
    /// Why the work did not succeed.
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Data for RequestCompensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    pub transaction_id: TransactionId,
    /// The operation to compensate; `None` targets the transaction saga.
    pub operation_id: Option<OperationId>,
    pub timestamp: DateTime<Utc>,
}

/// Data for TransactionFailed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFailedData {
    pub transaction_id: TransactionId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

// Convenience constructors
impl LifecycleEvent {
    /// Creates a StartTransaction event.
    pub fn start_transaction(transaction_id: TransactionId) -> Self {
        LifecycleEvent::StartTransaction(TransactionData {
            transaction_id,
            timestamp: Utc::now(),
        })
    }

    /// Creates a RequestExecuteOperation event.
    pub fn request_execute_operation(
        transaction_id: TransactionId,
        operation_id: OperationId,
        name: impl Into<String>,
        sequence_number: u32,
    ) -> Self {
        LifecycleEvent::RequestExecuteOperation(OperationRequestData {
            transaction_id,
            operation_id,
            name: name.into(),
            sequence_number,
            timestamp: Utc::now(),
        })
    }

    /// Creates an OperationCompleted event.
    pub fn operation_completed(
        transaction_id: TransactionId,
        operation_id: OperationId,
        name: impl Into<String>,
    ) -> Self {
        LifecycleEvent::OperationCompleted(OperationData {
            transaction_id,
            operation_id,
            name: name.into(),
            timestamp: Utc::now(),
        })
    }

    /// Creates an OperationFailed event.
    pub fn operation_failed(
        transaction_id: TransactionId,
        operation_id: OperationId,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        LifecycleEvent::OperationFailed(OperationFailedData {
            transaction_id,
            operation_id,
            name: name.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        })
    }

    /// Creates a RequestCompensation event for a single operation.
    pub fn request_operation_compensation(
        transaction_id: TransactionId,
        operation_id: OperationId,
    ) -> Self {
        LifecycleEvent::RequestCompensation(CompensationData {
            transaction_id,
            operation_id: Some(operation_id),
            timestamp: Utc::now(),
        })
    }

    /// Creates a transaction-scoped RequestCompensation event.
    pub fn request_transaction_compensation(transaction_id: TransactionId) -> Self {
        LifecycleEvent::RequestCompensation(CompensationData {
            transaction_id,
            operation_id: None,
            timestamp: Utc::now(),
        })
    }

    /// Creates a TransactionCompleted event.
    pub fn transaction_completed(transaction_id: TransactionId) -> Self {
        LifecycleEvent::TransactionCompleted(TransactionData {
            transaction_id,
            timestamp: Utc::now(),
        })
    }

    /// Creates a TransactionFailed event.
    pub fn transaction_failed(transaction_id: TransactionId, reason: impl Into<String>) -> Self {
        LifecycleEvent::TransactionFailed(TransactionFailedData {
            transaction_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        })
    }
}

//! Orchestrator error types.

use common::OperationId;
use persistence::PersistenceError;
use saga::ChannelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that abort a transaction execution.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// `execute` was called before `configure`.
    #[error("Transaction must be configured before it is executed")]
    NotConfigured,

    /// The cancellation token was signalled.
    #[error("Transaction execution was cancelled")]
    Cancelled,

    /// A durable write or read failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// A lifecycle event could not be published.
    #[error("Event channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Why an execute or compensate call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StepFailure {
    #[error("operation reported failure")]
    Reported,

    #[error("operation returned an error: {0}")]
    Errored(String),

    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// The operation that stopped the forward pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub operation_id: OperationId,
    pub name: String,
    /// 0-based position in the operation list.
    pub index: usize,
    pub failure: StepFailure,
}

/// A compensation that did not succeed. The pass continued past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub operation_id: OperationId,
    pub name: String,
    pub index: usize,
    pub failure: StepFailure,
}

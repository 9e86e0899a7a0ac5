//! Shared identifiers and lifecycle states for the saga orchestrator.

pub mod state;
pub mod types;

pub use state::LifecycleState;
pub use types::{Fingerprint, OperationId, TransactionId};

//! Per-operation executability check against persisted records.

use common::{LifecycleState, OperationId, TransactionId};
use persistence::OperationRecord;
use serde::{Deserialize, Serialize};

/// Why a validation result was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// The check refused execution, or the transaction shape changed.
    Failed,
    /// No persisted record existed; this is the first run.
    Missing,
}

/// What was validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationType {
    Transaction,
    Operation,
}

/// Informational outcome of a pre-run check. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub transaction_id: TransactionId,
    pub operation_id: Option<OperationId>,
    pub disposition: Disposition,
    #[serde(rename = "type")]
    pub kind: ValidationType,
}

impl ValidationResult {
    pub fn operation(
        transaction_id: TransactionId,
        operation_id: OperationId,
        disposition: Disposition,
    ) -> Self {
        Self {
            transaction_id,
            operation_id: Some(operation_id),
            disposition,
            kind: ValidationType::Operation,
        }
    }

    /// A transaction whose persisted fingerprint differs from the current one.
    pub fn fingerprint_mismatch(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            operation_id: None,
            disposition: Disposition::Failed,
            kind: ValidationType::Transaction,
        }
    }
}

/// Result of comparing an operation with the persisted snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executability {
    /// No record yet; run it and persist it.
    FirstRun,
    /// Persisted as New, Pending or Failed; run it again.
    Resume(LifecycleState),
    /// Persisted as Completed or Compensated; skip it.
    Settled(LifecycleState),
}

impl Executability {
    pub fn is_executable(&self) -> bool {
        !matches!(self, Executability::Settled(_))
    }

    /// Returns the validation result to record, if any.
    pub fn validation(
        &self,
        transaction_id: TransactionId,
        operation_id: OperationId,
    ) -> Option<ValidationResult> {
        match self {
            Executability::FirstRun => Some(ValidationResult::operation(
                transaction_id,
                operation_id,
                Disposition::Missing,
            )),
            Executability::Settled(_) => Some(ValidationResult::operation(
                transaction_id,
                operation_id,
                Disposition::Failed,
            )),
            Executability::Resume(_) => None,
        }
    }
}

/// Looks up `operation_id` in `snapshot` and decides whether it may run.
pub fn check_executable(operation_id: OperationId, snapshot: &[OperationRecord]) -> Executability {
    match snapshot.iter().find(|record| record.id == operation_id) {
        None => Executability::FirstRun,
        Some(record) if record.state.is_terminal() => Executability::Settled(record.state),
        Some(record) => Executability::Resume(record.state),
    }
}

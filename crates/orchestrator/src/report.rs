//! Outcome of one `execute` call.

use common::{Fingerprint, LifecycleState, OperationId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::{CompensationFailure, OperationFailure};
use crate::validation::ValidationResult;

/// Summary of a finished transaction attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub transaction_id: TransactionId,
    pub fingerprint: Option<Fingerprint>,
    /// Final transaction state.
    pub state: LifecycleState,
    /// True when the transaction was already settled and nothing ran.
    pub short_circuited: bool,
    /// Index the forward pass started from.
    pub start_index: usize,
    /// Operations whose work ran successfully in this attempt, in order.
    pub executed: Vec<OperationId>,
    /// Operations skipped because they were already settled.
    pub skipped: Vec<OperationId>,
    pub validation_results: Vec<ValidationResult>,
    pub failure: Option<OperationFailure>,
    /// Operations compensated successfully, in compensation order.
    pub compensated: Vec<OperationId>,
    pub compensation_failures: Vec<CompensationFailure>,
}

impl ExecutionReport {
    pub(crate) fn new(transaction_id: TransactionId, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            transaction_id,
            fingerprint,
            state: LifecycleState::New,
            short_circuited: false,
            start_index: 0,
            executed: Vec::new(),
            skipped: Vec::new(),
            validation_results: Vec::new(),
            failure: None,
            compensated: Vec::new(),
            compensation_failures: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == LifecycleState::Completed
    }

    pub fn is_compensated(&self) -> bool {
        self.state == LifecycleState::Compensated
    }
}

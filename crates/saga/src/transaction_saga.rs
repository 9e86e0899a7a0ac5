//! Per-transaction state machine.

use common::{LifecycleState, TransactionId};
use serde::{Deserialize, Serialize};

use crate::events::LifecycleEvent;
use crate::state::Transition;

/// State machine tracking one transaction.
///
/// ```text
/// New ──StartTransaction──► Pending ──┬─TransactionCompleted──► Completed
///                                     └─OperationFailed──► Failed ──RequestCompensation──► Compensated
/// ```
///
/// Completed and Compensated absorb every further event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSaga {
    transaction_id: TransactionId,
    state: LifecycleState,
}

impl TransactionSaga {
    /// Creates a saga in the pre-machine `New` state.
    pub fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            state: LifecycleState::New,
        }
    }

    /// Returns the correlated transaction ID.
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// Returns the current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Applies an event, returning the resulting transition.
    pub fn handle(&mut self, event: &LifecycleEvent) -> Transition {
        if event.transaction_id() != self.transaction_id || self.state.is_terminal() {
            return Transition::Ignored;
        }

        let next = match (self.state, event) {
            (LifecycleState::New, LifecycleEvent::StartTransaction(_)) => LifecycleState::Pending,
            (LifecycleState::Pending, LifecycleEvent::TransactionCompleted(_)) => {
                LifecycleState::Completed
            }
            (LifecycleState::Pending, LifecycleEvent::OperationFailed(_)) => LifecycleState::Failed,
            (LifecycleState::Failed, LifecycleEvent::RequestCompensation(data))
                if data.operation_id.is_none() =>
            {
                LifecycleState::Compensated
            }
            _ => return Transition::Ignored,
        };

        self.state = next;
        Transition::Entered(next)
    }
}

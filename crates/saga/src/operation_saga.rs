//! Per-operation state machine.

use common::{LifecycleState, OperationId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::events::LifecycleEvent;
use crate::state::{Transition, is_executable};

/// State machine tracking one operation of a transaction.
///
/// ```text
/// New ──RequestExecuteOperation [executable]──► Pending ──┬─OperationCompleted──► Completed ──RequestCompensation──► Compensated
///                                                         └─OperationFailed──► Failed ──RequestCompensation──► Compensated
/// ```
///
/// Compensated absorbs every event. Completed absorbs everything except a
/// compensation request addressed to this operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSaga {
    transaction_id: TransactionId,
    operation_id: OperationId,
    name: String,
    sequence_number: u32,
    state: LifecycleState,
}

impl OperationSaga {
    /// Creates a saga in the pre-machine `New` state.
    pub fn new(
        transaction_id: TransactionId,
        operation_id: OperationId,
        name: impl Into<String>,
        sequence_number: u32,
    ) -> Self {
        Self {
            transaction_id,
            operation_id,
            name: name.into(),
            sequence_number,
            state: LifecycleState::New,
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Applies an event, returning the resulting transition.
    pub fn handle(&mut self, event: &LifecycleEvent) -> Transition {
        if event.operation_id() != Some(self.operation_id)
            || self.state == LifecycleState::Compensated
        {
            return Transition::Ignored;
        }

        let next = match (self.state, event) {
            (state, LifecycleEvent::RequestExecuteOperation(data)) => {
                if matches!(state, LifecycleState::Pending | LifecycleState::Completed)
                    || !is_executable(&self.name, state, &data.name)
                {
                    return Transition::Ignored;
                }
                self.name.clone_from(&data.name);
                self.sequence_number = data.sequence_number;
                LifecycleState::Pending
            }
            (LifecycleState::Pending, LifecycleEvent::OperationCompleted(_)) => {
                LifecycleState::Completed
            }
            (LifecycleState::Pending, LifecycleEvent::OperationFailed(_)) => LifecycleState::Failed,
            (
                LifecycleState::Failed | LifecycleState::Completed,
                LifecycleEvent::RequestCompensation(_),
            ) => LifecycleState::Compensated,
            _ => return Transition::Ignored,
        };

        self.state = next;
        Transition::Entered(next)
    }
}

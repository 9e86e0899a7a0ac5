//! Shared state-machine vocabulary.

use common::LifecycleState;
use serde::{Deserialize, Serialize};

/// Outcome of feeding one event to a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The saga moved into the given state.
    Entered(LifecycleState),

    /// The event did not apply in the saga's current state.
    Ignored,
}

impl Transition {
    /// Returns the entered state, if the event caused a transition.
    pub fn entered(&self) -> Option<LifecycleState> {
        match self {
            Transition::Entered(state) => Some(*state),
            Transition::Ignored => None,
        }
    }
}

/// Returns true if a saga in `state` may be (re)started by a request named `requested`.
///
/// A request is refused only when it names the same operation and that
/// operation has already settled (Failed, Completed or Compensated).
pub fn is_executable(stored_name: &str, state: LifecycleState, requested: &str) -> bool {
    let settled = matches!(
        state,
        LifecycleState::Failed | LifecycleState::Completed | LifecycleState::Compensated
    );
    !(settled && stored_name == requested)
}

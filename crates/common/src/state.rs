//! Lifecycle state shared by transactions and operations.

use serde::{Deserialize, Serialize};

/// The state of a transaction or operation in its lifecycle.
///
/// State transitions:
/// ```text
/// New ──► Pending ──┬──► Completed
///                   └──► Failed ──► Compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LifecycleState {
    /// Created but not yet started.
    #[default]
    New,

    /// Work is in progress.
    Pending,

    /// Work finished successfully (terminal state).
    Completed,

    /// Work failed; compensation may follow.
    Failed,

    /// Compensation ran after a failure (terminal state).
    Compensated,
}

impl LifecycleState {
    /// Returns true if no further event may change this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Completed | LifecycleState::Compensated)
    }

    /// Returns true if a persisted entity in this state may be executed again.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            LifecycleState::New | LifecycleState::Pending | LifecycleState::Failed
        )
    }

    /// Returns true if this state is delivered to observers as an error signal.
    pub fn is_failure(&self) -> bool {
        matches!(self, LifecycleState::Failed)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::New => "New",
            LifecycleState::Pending => "Pending",
            LifecycleState::Completed => "Completed",
            LifecycleState::Failed => "Failed",
            LifecycleState::Compensated => "Compensated",
        }
    }

    /// Returns the numeric code used by durable stores.
    pub fn code(&self) -> i16 {
        match self {
            LifecycleState::New => 1,
            LifecycleState::Pending => 2,
            LifecycleState::Failed => 3,
            LifecycleState::Completed => 4,
            LifecycleState::Compensated => 5,
        }
    }

    /// Decodes a numeric code written by [`LifecycleState::code`].
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(LifecycleState::New),
            2 => Some(LifecycleState::Pending),
            3 => Some(LifecycleState::Failed),
            4 => Some(LifecycleState::Completed),
            5 => Some(LifecycleState::Compensated),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

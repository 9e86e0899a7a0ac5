use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Fingerprint, LifecycleState, OperationId, TransactionId};

/// Persisted transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The transaction ID.
    pub id: TransactionId,

    /// Current lifecycle state.
    pub state: LifecycleState,

    /// Fingerprint of the ordered operation names, if any operations were attached.
    pub fingerprint: Option<Fingerprint>,

    /// When the record was first written.
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Creates a record in the `New` state.
    pub fn new(id: TransactionId, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            id,
            state: LifecycleState::New,
            fingerprint,
            created_at: Utc::now(),
        }
    }

    /// Returns a copy of this record in another state.
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }
}

/// Persisted operation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// The operation ID.
    pub id: OperationId,

    /// The owning transaction.
    pub transaction_id: TransactionId,

    /// Operation name, as used for fingerprinting.
    pub name: String,

    /// 1-based position within the transaction.
    pub sequence_number: u32,

    /// Current lifecycle state.
    pub state: LifecycleState,

    /// When the record was first written.
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    /// Creates a record in the `New` state.
    pub fn new(
        id: OperationId,
        transaction_id: TransactionId,
        name: impl Into<String>,
        sequence_number: u32,
    ) -> Self {
        Self {
            id,
            transaction_id,
            name: name.into(),
            sequence_number,
            state: LifecycleState::New,
            created_at: Utc::now(),
        }
    }

    /// Returns a copy of this record in another state.
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }
}

/// Computes the forward-pass start index from an operation snapshot.
///
/// Returns `sequence_number - 1` of the lowest-sequenced record that can be
/// executed again, or 0 when there is none.
pub fn resume_index(operations: &[OperationRecord]) -> usize {
    operations
        .iter()
        .filter(|op| op.state.is_resumable())
        .map(|op| op.sequence_number)
        .min()
        .map(|sequence| sequence.saturating_sub(1) as usize)
        .unwrap_or(0)
}

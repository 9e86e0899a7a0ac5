//! The operation contract and its closure-based implementation.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use common::OperationId;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::OperationConfig;

/// Error returned by operation bodies.
pub type OperationError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok(true)` on success, `Ok(false)` for a reported failure.
pub type OperationResult = Result<bool, OperationError>;

pub(crate) type WorkFn = Arc<dyn Fn() -> BoxFuture<'static, OperationResult> + Send + Sync>;

pub(crate) fn boxed_work<F, Fut>(work: F) -> WorkFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OperationResult> + Send + 'static,
{
    Arc::new(move || Box::pin(work()))
}

/// Identity of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub id: OperationId,
    pub name: String,
}

impl OperationMetadata {
    pub fn new(id: OperationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A single compensable step of a transaction.
///
/// The orchestrator only relies on the metadata and the execute/compensate
/// pair. `release` runs exactly once after every execute or compensate call,
/// whatever its outcome, including panics.
#[async_trait]
pub trait Operation: Send + Sync {
    fn metadata(&self) -> &OperationMetadata;

    fn configure(&self) -> OperationConfig {
        OperationConfig::default()
    }

    async fn execute(&self) -> OperationResult;

    /// Undoes a previous `execute`. Defaults to a no-op reporting success.
    async fn compensate(&self) -> OperationResult {
        Ok(true)
    }

    /// Releases resources held for a single run.
    async fn release(&self) {}
}

/// Operation built from a work closure and an optional compensation closure.
///
/// ```ignore
/// let reserve = TransactionOperation::new("reserve", || async { Ok(true) })
///     .with_compensation(|| async { Ok(true) });
/// ```
pub struct TransactionOperation {
    metadata: OperationMetadata,
    sequence_number: Option<u32>,
    config: OperationConfig,
    work: WorkFn,
    compensation: Option<WorkFn>,
}

impl TransactionOperation {
    /// Creates an operation with a fresh random ID.
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Self::from_parts(
            OperationMetadata::new(OperationId::new(), name),
            OperationConfig::default(),
            boxed_work(work),
            None,
        )
    }

    pub(crate) fn from_parts(
        metadata: OperationMetadata,
        config: OperationConfig,
        work: WorkFn,
        compensation: Option<WorkFn>,
    ) -> Self {
        Self {
            metadata,
            sequence_number: None,
            config,
            work,
            compensation,
        }
    }

    /// Sets the compensation closure.
    pub fn with_compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.compensation = Some(boxed_work(compensation));
        self
    }

    /// Pins the operation ID, so a later attempt can match persisted records.
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.metadata.id = id;
        self
    }

    pub fn with_config(mut self, config: OperationConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn with_sequence_number(mut self, sequence_number: u32) -> Self {
        self.sequence_number = Some(sequence_number);
        self
    }

    pub fn id(&self) -> OperationId {
        self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The position assigned by a builder, if this operation came from one.
    pub fn sequence_number(&self) -> Option<u32> {
        self.sequence_number
    }
}

impl std::fmt::Debug for TransactionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionOperation")
            .field("metadata", &self.metadata)
            .field("sequence_number", &self.sequence_number)
            .field("config", &self.config)
            .field("has_compensation", &self.compensation.is_some())
            .finish()
    }
}

#[async_trait]
impl Operation for TransactionOperation {
    fn metadata(&self) -> &OperationMetadata {
        &self.metadata
    }

    fn configure(&self) -> OperationConfig {
        self.config
    }

    async fn execute(&self) -> OperationResult {
        (self.work)().await
    }

    async fn compensate(&self) -> OperationResult {
        match &self.compensation {
            Some(compensation) => compensation().await,
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_execute_runs_work() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let op = TransactionOperation::new("count", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        });

        assert!(op.execute().await.unwrap());
        assert!(op.execute().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_default_compensation_succeeds() {
        let op = TransactionOperation::new("noop", || async { Ok(false) });
        assert!(op.compensate().await.unwrap());
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let op = TransactionOperation::new("fails", || async { Err("boom".into()) })
            .with_compensation(|| async { Err("undo failed".into()) });

        assert_eq!(op.execute().await.unwrap_err().to_string(), "boom");
        assert_eq!(op.compensate().await.unwrap_err().to_string(), "undo failed");
    }

    #[test]
    fn test_with_id_pins_identity() {
        let id = OperationId::new();
        let op = TransactionOperation::new("pinned", || async { Ok(true) }).with_id(id);
        assert_eq!(op.id(), id);
        assert_eq!(op.name(), "pinned");
        assert!(op.sequence_number().is_none());
    }
}

//! Deferred construction of closure-based operations.

use std::future::Future;

use common::{OperationId, TransactionId};

use crate::config::OperationConfig;
use crate::operation::{
    OperationMetadata, OperationResult, TransactionOperation, WorkFn, boxed_work,
};

/// Produces a [`TransactionOperation`] once its transaction and position are known.
///
/// The operation ID is derived from the transaction ID, sequence number and
/// name, so the same builder attached at the same position of the same
/// transaction always yields the same ID.
pub struct OperationBuilder {
    name: String,
    config: OperationConfig,
    work: WorkFn,
    compensation: Option<WorkFn>,
}

impl OperationBuilder {
    pub fn new<F, Fut>(name: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            config: OperationConfig::default(),
            work: boxed_work(work),
            compensation: None,
        }
    }

    pub fn compensation<F, Fut>(mut self, compensation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        self.compensation = Some(boxed_work(compensation));
        self
    }

    pub fn configure(mut self, config: OperationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Materializes the operation for a transaction at a 1-based position.
    pub fn create(self, transaction_id: TransactionId, sequence_number: u32) -> TransactionOperation {
        let id = OperationId::derive(transaction_id, sequence_number, &self.name);
        TransactionOperation::from_parts(
            OperationMetadata::new(id, self.name),
            self.config,
            self.work,
            self.compensation,
        )
        .with_sequence_number(sequence_number)
    }
}

impl std::fmt::Debug for OperationBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationBuilder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

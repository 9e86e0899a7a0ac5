//! Saga transaction orchestration.
//!
//! A [`TransactionOrchestrator`] runs an ordered list of [`Operation`]s. Each
//! step is persisted through a [`persistence::PersistenceGateway`] and
//! announced as a [`saga::LifecycleEvent`], so the state machines can publish
//! notifications to subscribed observers. When an operation fails, the
//! operations up to and including it are compensated in reverse order.
//!
//! A transaction that was interrupted can be run again with the same
//! transaction ID and operation IDs: settled operations are skipped and the
//! forward pass resumes at the first unsettled one.

pub mod builder;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod operation;
pub mod orchestrator;
pub mod report;
pub mod validation;

pub use builder::OperationBuilder;
pub use cancellation::{CancellationSource, CancellationToken};
pub use config::{OperationConfig, RetryPolicy, TransactionConfig, TransactionConfigurator};
pub use error::{CompensationFailure, OperationFailure, OrchestratorError, Result, StepFailure};
pub use fingerprint::{HashAlgorithm, Sha512Base64, compute_fingerprint};
pub use operation::{
    Operation, OperationError, OperationMetadata, OperationResult, TransactionOperation,
};
pub use orchestrator::TransactionOrchestrator;
pub use report::ExecutionReport;
pub use validation::{
    Disposition, Executability, ValidationResult, ValidationType, check_executable,
};

//! Transaction orchestrator driving the forward and compensation passes.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use common::{LifecycleState, TransactionId};
use futures_util::FutureExt;
use persistence::{
    OperationRecord, PersistenceGateway, PersistenceGatewayExt, TransactionRecord,
};
use saga::{
    EventChannel, LifecycleEvent, Notification, NotificationBus, Observer, Subscription,
    TransactionCache, TransactionHandle,
};

use crate::builder::OperationBuilder;
use crate::cancellation::CancellationToken;
use crate::config::{RetryPolicy, TransactionConfig, TransactionConfigurator};
use crate::error::{CompensationFailure, OperationFailure, OrchestratorError, Result, StepFailure};
use crate::fingerprint::{HashAlgorithm, Sha512Base64, compute_fingerprint};
use crate::operation::Operation;
use crate::report::ExecutionReport;
use crate::validation::{Executability, ValidationResult, check_executable};

// Progress lines go to info when logging is turned on, debug otherwise.
macro_rules! progress {
    ($logging:expr, $($arg:tt)+) => {
        if $logging {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

enum Attached {
    Ready(Box<dyn Operation>),
    Deferred(OperationBuilder),
}

/// How far an operation got, as seen by the compensation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    NotReached,
    /// Completed by an earlier attempt, before the resume index.
    PreviouslyCompleted,
    Skipped,
    Ran,
}

enum StepOutcome {
    Skipped,
    Completed,
    Failed(OperationFailure),
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Execute,
    Compensate,
}

/// Runs an ordered list of operations as one compensable transaction.
///
/// One instance serves exactly one attempt: [`execute`](Self::execute)
/// consumes it. Operations run strictly one after another; when one fails,
/// every operation from the failing one down to the first is compensated in
/// reverse order.
///
/// ```ignore
/// let mut orchestrator = TransactionOrchestrator::new(store, channel, cache);
/// orchestrator
///     .configure(|c| {
///         c.subscribe(observer);
///     })
///     .add_operation(reserve)
///     .add_operation(charge);
/// let report = orchestrator.execute(&CancellationToken::none()).await?;
/// ```
pub struct TransactionOrchestrator<P, C> {
    persistence: P,
    channel: C,
    cache: TransactionCache,
    transaction_id: Option<TransactionId>,
    hash: Box<dyn HashAlgorithm>,
    config: Option<TransactionConfig>,
    pending_observers: Vec<Arc<dyn Observer>>,
    operations: Vec<Attached>,
    notifications: NotificationBus,
}

impl<P, C> TransactionOrchestrator<P, C>
where
    P: PersistenceGateway,
    C: EventChannel,
{
    /// Creates an orchestrator registering its transaction in `cache`.
    ///
    /// The cache must be the one the channel's state-machine host publishes
    /// through, otherwise saga notifications never reach this transaction's
    /// observers.
    pub fn new(persistence: P, channel: C, cache: TransactionCache) -> Self {
        Self {
            persistence,
            channel,
            cache,
            transaction_id: None,
            hash: Box::new(Sha512Base64),
            config: None,
            pending_observers: Vec::new(),
            operations: Vec::new(),
            notifications: NotificationBus::new(),
        }
    }

    /// Uses a caller-supplied transaction ID, e.g. to resume an earlier attempt.
    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Replaces the fingerprint hash algorithm.
    pub fn with_hash_algorithm(mut self, algorithm: impl HashAlgorithm + 'static) -> Self {
        self.hash = Box::new(algorithm);
        self
    }

    /// Applies transaction configuration. Must be called before `execute`.
    pub fn configure<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut TransactionConfigurator),
    {
        let mut configurator = TransactionConfigurator::new();
        configure(&mut configurator);
        let (config, observers) = configurator.into_parts();
        self.config = Some(config);
        self.pending_observers.extend(observers);
        self
    }

    /// Appends an operation.
    pub fn add_operation(&mut self, operation: impl Operation + 'static) -> &mut Self {
        self.operations
            .push(Attached::Ready(Box::new(operation)));
        self
    }

    /// Appends operations, preserving iteration order.
    pub fn add_operations<I>(&mut self, operations: I) -> &mut Self
    where
        I: IntoIterator<Item = Box<dyn Operation>>,
    {
        self.operations
            .extend(operations.into_iter().map(Attached::Ready));
        self
    }

    /// Appends an operation produced by `builder` once the transaction ID is known.
    pub fn add_builder(&mut self, builder: OperationBuilder) -> &mut Self {
        self.operations.push(Attached::Deferred(builder));
        self
    }

    /// Subscribes an observer, returning a handle that can remove it again.
    pub async fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        self.notifications.subscribe(observer).await
    }

    /// The caller-supplied transaction ID, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    /// Number of attached operations.
    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Runs the transaction.
    ///
    /// Only configuration, cancellation, persistence and channel failures are
    /// returned as errors. Operation and compensation failures are absorbed
    /// into the report and the emitted notifications.
    #[tracing::instrument(skip_all, fields(transaction_id = tracing::field::Empty))]
    pub async fn execute(self, cancellation: &CancellationToken) -> Result<ExecutionReport> {
        if cancellation.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let config = self.config.ok_or(OrchestratorError::NotConfigured)?;

        let transaction_id = self.transaction_id.unwrap_or_default();
        tracing::Span::current().record("transaction_id", tracing::field::display(transaction_id));

        if config.retry != RetryPolicy::None {
            tracing::warn!(retry = %config.retry, "retry policies are not applied, operations run once");
        }

        let operations: Vec<Box<dyn Operation>> = self
            .operations
            .into_iter()
            .enumerate()
            .map(|(index, attached)| match attached {
                Attached::Ready(operation) => operation,
                Attached::Deferred(builder) => {
                    Box::new(builder.create(transaction_id, sequence_number(index)))
                }
            })
            .collect();

        let names: Vec<String> = operations
            .iter()
            .map(|operation| operation.metadata().name.clone())
            .collect();
        let fingerprint = compute_fingerprint(names.iter().map(String::as_str), self.hash.as_ref());

        for observer in self.pending_observers {
            // Configured observers stay until the transaction finishes
            let _subscription = self.notifications.subscribe(observer).await;
        }

        self.cache
            .store(TransactionHandle::new(
                transaction_id,
                fingerprint.clone(),
                names,
                self.notifications.clone(),
            ))
            .await;

        let mut execution = Execution {
            persistence: self.persistence,
            channel: self.channel,
            notifications: self.notifications,
            transaction_id,
            logging: config.logging,
            operations,
            report: ExecutionReport::new(transaction_id, fingerprint),
        };

        let started = Instant::now();
        let outcome = execution.drive(cancellation).await;
        // Queued saga transitions must reach observers before completion
        let drained = execution.channel.flush().await;
        if let Err(error) = &drained {
            tracing::warn!(%error, "event channel not drained before completion");
        }
        execution.notifications.complete().await;
        metrics::histogram!("transaction_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let state = outcome?;
        drained?;
        execution.report.state = state;
        tracing::info!(%state, short_circuited = execution.report.short_circuited, "transaction finished");
        Ok(execution.report)
    }
}

/// State of one running attempt.
struct Execution<P, C> {
    persistence: P,
    channel: C,
    notifications: NotificationBus,
    transaction_id: TransactionId,
    logging: bool,
    operations: Vec<Box<dyn Operation>>,
    report: ExecutionReport,
}

impl<P, C> Execution<P, C>
where
    P: PersistenceGateway,
    C: EventChannel,
{
    async fn drive(&mut self, cancellation: &CancellationToken) -> Result<LifecycleState> {
        let tx = self.transaction_id;

        match self.persistence.get_transaction(tx).await? {
            Some(existing) if existing.state.is_terminal() => {
                tracing::info!(state = %existing.state, "transaction already settled");
                self.report.short_circuited = true;
                return Ok(existing.state);
            }
            Some(existing) => {
                if let (Some(persisted), Some(current)) =
                    (&existing.fingerprint, &self.report.fingerprint)
                    && persisted != current
                {
                    tracing::warn!(%persisted, %current, "operation list differs from the persisted transaction");
                    self.report
                        .validation_results
                        .push(ValidationResult::fingerprint_mismatch(tx));
                }
            }
            None => {
                let record = TransactionRecord::new(tx, self.report.fingerprint.clone());
                self.persistence.save_transaction(&record).await?;
                self.announce(Notification::transaction(tx, LifecycleState::New))
                    .await?;
            }
        }

        self.persistence
            .update_transaction_state(tx, LifecycleState::Pending)
            .await?;
        self.channel
            .publish(LifecycleEvent::start_transaction(tx))
            .await?;
        metrics::counter!("transactions_executed_total").increment(1);

        let start = self.persistence.get_start_operation(tx).await?;
        let snapshot = self.persistence.get_all_operations(tx).await?;
        self.report.start_index = start;
        progress!(self.logging, start, operations = self.operations.len(), "forward pass starting");

        let mut progress = vec![Progress::NotReached; self.operations.len()];
        for (index, operation) in self.operations.iter().enumerate().take(start) {
            let id = operation.metadata().id;
            if snapshot
                .iter()
                .any(|record| record.id == id && record.state == LifecycleState::Completed)
            {
                progress[index] = Progress::PreviouslyCompleted;
            }
        }

        let mut failure = None;
        for index in start..self.operations.len() {
            if cancellation.is_cancelled() {
                tracing::warn!(index, "cancelled before operation, transaction left resumable");
                return Err(OrchestratorError::Cancelled);
            }

            match self.run_operation(index, &snapshot).await? {
                StepOutcome::Skipped => progress[index] = Progress::Skipped,
                StepOutcome::Completed => progress[index] = Progress::Ran,
                StepOutcome::Failed(operation_failure) => {
                    progress[index] = Progress::Ran;
                    failure = Some(operation_failure);
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            self.persistence
                .update_transaction_state(tx, LifecycleState::Completed)
                .await?;
            self.channel
                .publish(LifecycleEvent::transaction_completed(tx))
                .await?;
            metrics::counter!("transactions_completed").increment(1);
            return Ok(LifecycleState::Completed);
        };

        let failing_index = failure.index;
        self.persistence
            .update_transaction_state(tx, LifecycleState::Failed)
            .await?;
        self.channel
            .publish(LifecycleEvent::transaction_failed(
                tx,
                format!("operation '{}' failed: {}", failure.name, failure.failure),
            ))
            .await?;
        self.report.failure = Some(failure);

        self.compensate(failing_index, &progress).await?;

        self.persistence
            .update_transaction_state(tx, LifecycleState::Compensated)
            .await?;
        self.channel
            .publish(LifecycleEvent::request_transaction_compensation(tx))
            .await?;
        metrics::counter!("transactions_compensated").increment(1);
        Ok(LifecycleState::Compensated)
    }

    /// Publishes an orchestrator-originated notification behind every saga
    /// transition already queued on the channel.
    async fn announce(&self, notification: Notification) -> Result<()> {
        self.channel.flush().await?;
        self.notifications.publish(&notification).await;
        Ok(())
    }

    async fn run_operation(
        &mut self,
        index: usize,
        snapshot: &[OperationRecord],
    ) -> Result<StepOutcome> {
        let tx = self.transaction_id;
        let metadata = self.operations[index].metadata().clone();
        let sequence = sequence_number(index);
        let logging = self.logging || self.operations[index].configure().logging;

        let check = check_executable(metadata.id, snapshot);
        if let Some(result) = check.validation(tx, metadata.id) {
            self.report.validation_results.push(result);
        }

        if !check.is_executable() {
            progress!(logging, operation = %metadata.name, sequence, check = ?check, "operation already settled, skipping");
            self.report.skipped.push(metadata.id);
            return Ok(StepOutcome::Skipped);
        }

        if let Executability::Resume(state) = check {
            progress!(logging, operation = %metadata.name, sequence, %state, "resuming operation");
        } else {
            let record = OperationRecord::new(metadata.id, tx, metadata.name.as_str(), sequence);
            self.persistence.save_operation(&record).await?;
            self.announce(Notification::operation(
                tx,
                metadata.id,
                metadata.name.as_str(),
                LifecycleState::New,
            ))
            .await?;
        }

        self.persistence
            .update_operation_state(tx, metadata.id, LifecycleState::Pending)
            .await?;
        self.channel
            .publish(LifecycleEvent::request_execute_operation(
                tx,
                metadata.id,
                metadata.name.as_str(),
                sequence,
            ))
            .await?;

        progress!(logging, operation = %metadata.name, sequence, "executing operation");
        metrics::counter!("operations_executed_total").increment(1);

        match run_step(self.operations[index].as_ref(), Phase::Execute).await {
            Ok(()) => {
                self.persistence
                    .update_operation_state(tx, metadata.id, LifecycleState::Completed)
                    .await?;
                self.channel
                    .publish(LifecycleEvent::operation_completed(
                        tx,
                        metadata.id,
                        metadata.name.as_str(),
                    ))
                    .await?;
                self.report.executed.push(metadata.id);
                Ok(StepOutcome::Completed)
            }
            Err(step_failure) => {
                metrics::counter!("operations_failed_total").increment(1);
                tracing::warn!(operation = %metadata.name, sequence, reason = %step_failure, "operation failed");

                self.persistence
                    .update_operation_state(tx, metadata.id, LifecycleState::Failed)
                    .await?;
                self.channel
                    .publish(LifecycleEvent::operation_failed(
                        tx,
                        metadata.id,
                        metadata.name.as_str(),
                        step_failure.to_string(),
                    ))
                    .await?;

                Ok(StepOutcome::Failed(OperationFailure {
                    operation_id: metadata.id,
                    name: metadata.name,
                    index,
                    failure: step_failure,
                }))
            }
        }
    }

    /// Compensates operations `failing_index..=0` in descending order.
    ///
    /// Each successfully compensated operation is persisted as Compensated and
    /// announced with a `RequestCompensation` event. A failed compensation is
    /// recorded and the pass moves on.
    #[tracing::instrument(skip(self, progress), fields(transaction_id = %self.transaction_id))]
    async fn compensate(&mut self, failing_index: usize, progress: &[Progress]) -> Result<()> {
        let tx = self.transaction_id;

        for index in (0..=failing_index).rev() {
            let operation = &self.operations[index];
            let metadata = operation.metadata().clone();

            if !matches!(progress[index], Progress::Ran | Progress::PreviouslyCompleted) {
                tracing::debug!(operation = %metadata.name, "operation did not run, nothing to compensate");
                continue;
            }

            progress!(self.logging, operation = %metadata.name, index, "compensating operation");
            metrics::counter!("compensations_executed_total").increment(1);

            match run_step(operation.as_ref(), Phase::Compensate).await {
                Ok(()) => {
                    self.persistence
                        .update_operation_state(tx, metadata.id, LifecycleState::Compensated)
                        .await?;
                    self.channel
                        .publish(LifecycleEvent::request_operation_compensation(
                            tx,
                            metadata.id,
                        ))
                        .await?;
                    self.report.compensated.push(metadata.id);
                }
                Err(step_failure) => {
                    metrics::counter!("compensation_failures_total").increment(1);
                    tracing::warn!(operation = %metadata.name, index, reason = %step_failure, "compensation failed, continuing");
                    self.report.compensation_failures.push(CompensationFailure {
                        operation_id: metadata.id,
                        name: metadata.name,
                        index,
                        failure: step_failure,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Runs one execute or compensate call, then releases the operation's resources.
async fn run_step(operation: &dyn Operation, phase: Phase) -> std::result::Result<(), StepFailure> {
    let call = match phase {
        Phase::Execute => operation.execute(),
        Phase::Compensate => operation.compensate(),
    };
    let outcome = AssertUnwindSafe(call).catch_unwind().await;
    operation.release().await;

    match outcome {
        Ok(Ok(true)) => Ok(()),
        Ok(Ok(false)) => Err(StepFailure::Reported),
        Ok(Err(error)) => Err(StepFailure::Errored(error.to_string())),
        Err(payload) => Err(StepFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// 1-based sequence number of the operation at `index`.
fn sequence_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

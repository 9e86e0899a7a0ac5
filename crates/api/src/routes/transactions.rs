//! Transaction inspection and scripted-run endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::TransactionId;
use orchestrator::{CancellationToken, ExecutionReport, OperationBuilder, TransactionOrchestrator};
use persistence::PersistenceGateway;
use saga::{InProcessChannel, StateMachineHost, TransactionCache};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub persistence: Arc<dyn PersistenceGateway>,
    pub cache: TransactionCache,
    pub host: Arc<StateMachineHost>,
    pub channel: InProcessChannel,
    /// Signalled on shutdown; runs stop before their next operation.
    pub shutdown: CancellationToken,
    /// Settled transactions kept cached after a run; older ones are evicted.
    pub retained_transactions: usize,
}

// -- Request types --

#[derive(Deserialize)]
pub struct RunTransactionRequest {
    /// Reuse an earlier transaction ID to resume it.
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub logging: bool,
    pub steps: Vec<StepRequest>,
}

#[derive(Deserialize)]
pub struct StepRequest {
    pub name: String,
    /// Make the step report failure.
    #[serde(default)]
    pub fail: bool,
    /// Make the step's compensation report failure.
    #[serde(default)]
    pub fail_compensation: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransactionSummaryResponse {
    pub id: String,
    pub fingerprint: Option<String>,
    pub operations: Vec<String>,
    pub registered_at: String,
    /// Live state of the transaction saga, if it has seen events.
    pub saga_state: Option<String>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub state: String,
    pub fingerprint: Option<String>,
    pub created_at: String,
    pub saga_state: Option<String>,
    pub operations: Vec<OperationResponse>,
}

#[derive(Serialize)]
pub struct OperationResponse {
    pub id: String,
    pub name: String,
    pub sequence_number: u32,
    pub state: String,
    pub saga_state: Option<String>,
}

// -- Handlers --

/// GET /transactions: list transactions registered in the cache.
#[tracing::instrument(skip(state))]
pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<TransactionSummaryResponse>> {
    let mut summaries = Vec::new();
    for handle in state.cache.list().await {
        let saga_state = state
            .host
            .transaction_saga(handle.transaction_id)
            .await
            .map(|saga| saga.state().to_string());
        summaries.push(TransactionSummaryResponse {
            id: handle.transaction_id.to_string(),
            fingerprint: handle.fingerprint.map(|fp| fp.to_string()),
            operations: handle.operation_names,
            registered_at: handle.registered_at.to_rfc3339(),
            saga_state,
        });
    }
    Json(summaries)
}

/// GET /transactions/{id}: load a persisted transaction with its operations.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let transaction_id = parse_transaction_id(&id)?;
    let record = state
        .persistence
        .get_transaction(transaction_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {transaction_id} not found")))?;

    let mut operations = Vec::new();
    for op in state.persistence.get_all_operations(transaction_id).await? {
        let saga_state = state
            .host
            .operation_saga(op.id)
            .await
            .map(|saga| saga.state().to_string());
        operations.push(OperationResponse {
            id: op.id.to_string(),
            name: op.name,
            sequence_number: op.sequence_number,
            state: op.state.to_string(),
            saga_state,
        });
    }

    let saga_state = state
        .host
        .transaction_saga(transaction_id)
        .await
        .map(|saga| saga.state().to_string());

    Ok(Json(TransactionResponse {
        id: record.id.to_string(),
        state: record.state.to_string(),
        fingerprint: record.fingerprint.map(|fp| fp.to_string()),
        created_at: record.created_at.to_rfc3339(),
        saga_state,
        operations,
    }))
}

/// POST /transactions: run a scripted transaction and return its report.
#[tracing::instrument(skip(state, req), fields(steps = req.steps.len()))]
pub async fn run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RunTransactionRequest>,
) -> Result<Json<ExecutionReport>, ApiError> {
    if req.steps.iter().any(|step| step.name.trim().is_empty()) {
        return Err(ApiError::BadRequest("Step names must not be empty".to_string()));
    }

    let mut orchestrator = TransactionOrchestrator::new(
        Arc::clone(&state.persistence),
        state.channel.clone(),
        state.cache.clone(),
    );
    if let Some(id) = &req.transaction_id {
        orchestrator = orchestrator.with_transaction_id(parse_transaction_id(id)?);
    }

    let logging = req.logging;
    orchestrator.configure(|c| {
        if logging {
            c.turn_on_logging();
        }
    });
    for step in req.steps {
        let (succeed, compensates) = (!step.fail, !step.fail_compensation);
        orchestrator.add_builder(
            OperationBuilder::new(step.name, move || async move { Ok(succeed) })
                .compensation(move || async move { Ok(compensates) }),
        );
    }

    let outcome = orchestrator.execute(&state.shutdown).await;
    enforce_retention(&state).await;
    Ok(Json(outcome?))
}

/// DELETE /transactions/{id}: evict a transaction's cached handle and sagas.
#[tracing::instrument(skip(state))]
pub async fn evict(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let transaction_id = parse_transaction_id(&id)?;
    if forget(&state, transaction_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Transaction {transaction_id} is not cached"
        )))
    }
}

/// Drops the cached handle and every saga of a transaction.
///
/// Returns false if no handle was cached.
async fn forget(state: &AppState, transaction_id: TransactionId) -> bool {
    let cached = state.cache.evict(transaction_id).await.is_some();
    let sagas = state.host.evict(transaction_id).await;
    tracing::debug!(%transaction_id, cached, sagas, "transaction forgotten");
    cached
}

/// Evicts the oldest settled transactions beyond the retention limit.
///
/// Transactions whose saga is still in flight are left alone.
async fn enforce_retention(state: &AppState) {
    let handles = state.cache.list().await;
    let mut excess = handles.len().saturating_sub(state.retained_transactions);

    for handle in handles {
        if excess == 0 {
            break;
        }
        let settled = state
            .host
            .transaction_saga(handle.transaction_id)
            .await
            .is_none_or(|saga| saga.state().is_terminal());
        if settled && forget(state, handle.transaction_id).await {
            metrics::counter!("transactions_evicted_total").increment(1);
            excess -= 1;
        }
    }
}

fn parse_transaction_id(id: &str) -> Result<TransactionId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid transaction ID: {e}")))?;
    Ok(TransactionId::from_uuid(uuid))
}

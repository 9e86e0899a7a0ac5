//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::routes::transactions::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Transaction handles currently held in the cache.
    pub cached_transactions: usize,
    /// Live transaction and operation sagas.
    pub live_sagas: usize,
    /// False once shutdown has been signalled.
    pub accepting_runs: bool,
}

/// GET /health: reports liveness and the size of the in-memory saga state.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let accepting_runs = !state.shutdown.is_cancelled();
    Json(HealthResponse {
        status: if accepting_runs { "ok" } else { "draining" },
        cached_transactions: state.cache.len().await,
        live_sagas: state.host.saga_count().await,
        accepting_runs,
    })
}

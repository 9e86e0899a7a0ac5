//! HTTP host for the saga transaction orchestrator.
//!
//! Provides REST endpoints to run scripted transactions and to inspect cached
//! handles, persisted records and live saga state, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::CancellationToken;
use persistence::PersistenceGateway;
use saga::{InProcessChannel, StateMachineHost, TransactionCache};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::metrics::MetricsState;
use routes::transactions::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            app: Arc::clone(&state),
        });

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/transactions",
            get(routes::transactions::list).post(routes::transactions::run),
        )
        .route(
            "/transactions/{id}",
            get(routes::transactions::get).delete(routes::transactions::evict),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires a gateway to a fresh cache, state-machine host and in-process channel.
///
/// At most `retained_transactions` settled transactions stay cached after a run.
pub fn create_default_state(
    persistence: Arc<dyn PersistenceGateway>,
    shutdown: CancellationToken,
    retained_transactions: usize,
) -> Arc<AppState> {
    let cache = TransactionCache::new();
    let host = Arc::new(StateMachineHost::new(cache.clone()));
    let channel = InProcessChannel::new(Arc::clone(&host));

    Arc::new(AppState {
        persistence,
        cache,
        host,
        channel,
        shutdown,
        retained_transactions,
    })
}

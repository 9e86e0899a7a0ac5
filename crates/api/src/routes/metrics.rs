//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::routes::transactions::AppState;

/// State of the metrics route: the recorder handle plus the saga state it samples.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub app: Arc<AppState>,
}

/// GET /metrics: samples the cache and saga gauges, then renders every metric.
pub async fn get(State(state): State<MetricsState>) -> impl IntoResponse {
    metrics::gauge!("transactions_cached").set(state.app.cache.len().await as f64);
    metrics::gauge!("sagas_live").set(state.app.host.saga_count().await as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.handle.render(),
    )
}

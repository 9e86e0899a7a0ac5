//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{CancellationSource, CancellationToken};
use api::routes::transactions::AppState;
use persistence::InMemoryPersistence;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn build(
    shutdown: CancellationToken,
    retained_transactions: usize,
) -> (axum::Router, InMemoryPersistence, Arc<AppState>) {
    let store = InMemoryPersistence::new();
    let state = api::create_default_state(Arc::new(store.clone()), shutdown, retained_transactions);
    let app = api::create_app(Arc::clone(&state), get_metrics_handle());
    (app, store, state)
}

fn setup_with_token(shutdown: CancellationToken) -> (axum::Router, InMemoryPersistence) {
    let (app, store, _) = build(shutdown, 100);
    (app, store)
}

fn setup() -> (axum::Router, InMemoryPersistence) {
    setup_with_token(CancellationToken::none())
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn run_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/transactions")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["accepting_runs"], true);
    assert_eq!(json["cached_transactions"], 0);
    assert_eq!(json["live_sagas"], 0);
}

#[tokio::test]
async fn test_health_reports_saga_state_and_shutdown() {
    let source = CancellationSource::new();
    let (app, _) = setup_with_token(source.token());
    send(
        &app,
        run_request(serde_json::json!({ "steps": [{ "name": "a" }, { "name": "b" }] })),
    )
    .await;

    let (_, json) = send(&app, get("/health")).await;
    assert_eq!(json["cached_transactions"], 1);
    assert_eq!(json["live_sagas"], 3);

    source.cancel();
    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "draining");
    assert_eq!(json["accepting_runs"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("transactions_cached"));
    assert!(text.contains("sagas_live"));
}

#[tokio::test]
async fn test_run_successful_transaction() {
    let (app, store) = setup();

    let (status, report) = send(
        &app,
        run_request(serde_json::json!({
            "steps": [{ "name": "reserve" }, { "name": "charge" }, { "name": "ship" }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["state"], "Completed");
    assert_eq!(report["executed"].as_array().unwrap().len(), 3);
    assert!(report["fingerprint"].as_str().is_some());
    assert_eq!(store.transaction_count().await, 1);
    assert_eq!(store.operation_count().await, 3);
}

#[tokio::test]
async fn test_run_failing_transaction_is_compensated() {
    let (app, _) = setup();

    let (status, report) = send(
        &app,
        run_request(serde_json::json!({
            "logging": true,
            "steps": [
                { "name": "reserve" },
                { "name": "charge", "fail_compensation": true },
                { "name": "ship", "fail": true }
            ]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["state"], "Compensated");
    assert_eq!(report["failure"]["name"], "ship");
    assert_eq!(report["failure"]["index"], 2);
    assert_eq!(report["compensated"].as_array().unwrap().len(), 2);
    assert_eq!(report["compensation_failures"][0]["name"], "charge");
}

#[tokio::test]
async fn test_run_rejects_blank_step_names() {
    let (app, store) = setup();

    let (status, json) = send(
        &app,
        run_request(serde_json::json!({ "steps": [{ "name": "  " }] })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
    assert_eq!(store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_rerun_of_settled_transaction_short_circuits() {
    let (app, _) = setup();
    let body = serde_json::json!({ "steps": [{ "name": "reserve" }] });

    let (_, first) = send(&app, run_request(body)).await;
    let id = first["transaction_id"].as_str().unwrap().to_string();

    let (status, second) = send(
        &app,
        run_request(serde_json::json!({
            "transaction_id": id,
            "steps": [{ "name": "reserve" }]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["short_circuited"], true);
    assert_eq!(second["state"], "Completed");
}

#[tokio::test]
async fn test_run_after_shutdown_is_unavailable() {
    let source = CancellationSource::new();
    source.cancel();
    let (app, store) = setup_with_token(source.token());

    let (status, _) = send(
        &app,
        run_request(serde_json::json!({ "steps": [{ "name": "reserve" }] })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_get_transaction_after_run() {
    let (app, _) = setup();
    let (_, report) = send(
        &app,
        run_request(serde_json::json!({
            "steps": [{ "name": "reserve" }, { "name": "charge", "fail": true }]
        })),
    )
    .await;
    let id = report["transaction_id"].as_str().unwrap();

    let (status, json) = send(&app, get(&format!("/transactions/{id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], id);
    assert_eq!(json["state"], "Compensated");
    assert_eq!(json["saga_state"], "Compensated");
    let operations = json["operations"].as_array().unwrap();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0]["name"], "reserve");
    assert_eq!(operations[0]["state"], "Compensated");
    assert_eq!(operations[0]["saga_state"], "Compensated");
    assert_eq!(operations[1]["sequence_number"], 2);
    assert_eq!(operations[1]["state"], "Compensated");
    assert_eq!(operations[1]["saga_state"], "Compensated");
}

#[tokio::test]
async fn test_get_nonexistent_transaction() {
    let (app, _) = setup();
    let id = uuid::Uuid::new_v4();

    let (status, json) = send(&app, get(&format!("/transactions/{id}"))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains(&id.to_string()));
}

#[tokio::test]
async fn test_invalid_transaction_id_format() {
    let (app, _) = setup();

    let (status, _) = send(&app, get("/transactions/not-a-uuid")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_and_evict_cached_transactions() {
    let (app, _, state) = build(CancellationToken::none(), 100);
    for steps in [
        serde_json::json!([{ "name": "a" }]),
        serde_json::json!([{ "name": "b" }, { "name": "c" }]),
    ] {
        send(&app, run_request(serde_json::json!({ "steps": steps }))).await;
    }

    let (status, list) = send(&app, get("/transactions")).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap().clone();
    assert_eq!(list.len(), 2);
    assert_eq!(list[1]["operations"], serde_json::json!(["b", "c"]));
    assert_eq!(list[1]["saga_state"], "Completed");

    assert_eq!(state.host.saga_count().await, 5);

    let uri = format!("/transactions/{}", list[0]["id"].as_str().unwrap());
    let (status, _) = send(&app, delete(&uri)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, delete(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = send(&app, get("/transactions")).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(state.host.saga_count().await, 3);
}

#[tokio::test]
async fn test_retention_evicts_oldest_transactions() {
    let (app, store, state) = build(CancellationToken::none(), 2);
    let mut ids = Vec::new();
    for name in ["a", "b", "c"] {
        let (_, report) = send(
            &app,
            run_request(serde_json::json!({ "steps": [{ "name": name }] })),
        )
        .await;
        ids.push(report["transaction_id"].as_str().unwrap().to_string());
    }

    let (_, list) = send(&app, get("/transactions")).await;
    let cached: Vec<_> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|summary| summary["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(cached, ids[1..].to_vec());
    assert_eq!(state.cache.len().await, 2);
    assert_eq!(state.host.saga_count().await, 4);

    // Evicted transactions are still persisted
    assert_eq!(store.transaction_count().await, 3);
    let (status, json) = send(&app, get(&format!("/transactions/{}", ids[0]))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["saga_state"], serde_json::Value::Null);
}

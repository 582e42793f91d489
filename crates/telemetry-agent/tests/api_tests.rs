//! Integration tests for the agent API endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use telemetry_agent::api::{create_router, AppState};
use telemetry_core::{
    health::{components, ComponentStatus, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    processor::StreamProcessor,
};
use tower::ServiceExt;

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLE_WORKER).await;
    health_registry.register(components::ANOMALY_DISPATCH).await;

    let metrics = ServiceMetrics::new().unwrap();
    let processor = StreamProcessor::builder()
        .window_size(50)
        .zscore_threshold(2.0)
        .notifier(Arc::new(metrics.clone()))
        .sink(Arc::new(StructuredLogger::new("api-tests")))
        .health(health_registry.clone())
        .build()
        .unwrap();
    processor.start().unwrap();

    let state = Arc::new(AppState::new(
        Arc::new(processor),
        metrics,
        health_registry,
    ));
    wait_for_workers(&state.health).await;

    let router = create_router(state.clone());
    (router, state)
}

async fn wait_for_workers(health: &HealthRegistry) {
    for _ in 0..1000 {
        let sample = health.status(components::SAMPLE_WORKER).await;
        let dispatch = health.status(components::ANOMALY_DISPATCH).await;
        if sample == Some(ComponentStatus::Healthy) && dispatch == Some(ComponentStatus::Healthy)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("workers did not report healthy");
}

async fn wait_until_applied(state: &AppState, applied: u64) {
    for _ in 0..1000 {
        if state.processor.stats().applied >= applied {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("samples were not applied in time");
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let (status, body) = send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let (status, body) = send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn sample(cpu: f64, rps: f64) -> serde_json::Value {
    serde_json::json!({
        "timestamp": "2024-01-01T00:00:00Z",
        "cpu": cpu,
        "rps": rps,
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_workers_running() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = get_json(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["components"]["sample_worker"]["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health
        .set_degraded(components::ANOMALY_DISPATCH, "sink log failed")
        .await;

    let (status, health) = get_json(&app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_after_stop() {
    let (app, state) = setup_test_app().await;

    state.processor.stop().await;

    let (status, health) = get_json(&app, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_ready_flag() {
    let (app, state) = setup_test_app().await;

    // Not ready until the service marks itself initialized
    let (status, readiness) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    state.health.set_ready(true).await;

    let (status, readiness) = get_json(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_ingest_accepts_valid_sample() {
    let (app, state) = setup_test_app().await;

    let (status, body) = post_json(&app, "/ingest", sample(45.0, 1200.0)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["timestamp"], "2024-01-01T00:00:00Z");
    assert!(body["processed"].is_string());
    assert_eq!(state.processor.total_samples(), 1);
}

#[tokio::test]
async fn test_ingest_rejects_invalid_samples() {
    let (app, state) = setup_test_app().await;

    let (status, body) = post_json(&app, "/ingest", sample(101.0, 10.0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "cpu must be between 0 and 100");

    let (status, body) = post_json(&app, "/ingest", sample(50.0, -5.0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "rps must be non-negative");

    let (status, body) = post_json(
        &app,
        "/ingest",
        serde_json::json!({ "cpu": 10.0, "rps": 10.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "timestamp is required");

    let (status, body) = post_json(
        &app,
        "/ingest",
        serde_json::json!({ "timestamp": "01/01/2024", "cpu": 10.0, "rps": 10.0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid timestamp format, use RFC3339");

    assert_eq!(state.processor.total_samples(), 0);
}

#[tokio::test]
async fn test_ingest_rejects_malformed_body() {
    let (app, _state) = setup_test_app().await;

    let (status, body) = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/ingest")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "Invalid request body");
}

#[tokio::test]
async fn test_ingest_returns_503_after_stop() {
    let (app, state) = setup_test_app().await;
    state.processor.stop().await;

    let (status, body) = post_json(&app, "/ingest", sample(45.0, 1200.0)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("stopped"));
}

#[tokio::test]
async fn test_ingest_ignores_tag_fields() {
    let (app, state) = setup_test_app().await;

    let (status, body) = post_json(
        &app,
        "/ingest",
        serde_json::json!({
            "timestamp": "2024-01-01T00:00:00Z",
            "cpu": 10,
            "rps": 5,
            "device_id": "x",
            "memory": null,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");

    let batch = serde_json::json!([
        { "timestamp": "2024-01-01T00:00:01Z", "cpu": 11, "rps": 6, "device_id": "a" },
        { "timestamp": "2024-01-01T00:00:02Z", "cpu": 12, "rps": 7, "device_id": "b" },
    ]);
    let (status, body) = post_json(&app, "/ingest/batch", batch).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processed"], 2);
    assert_eq!(body["failed"], 0);

    assert_eq!(state.processor.total_samples(), 3);
}

#[tokio::test]
async fn test_batch_counts_failures() {
    let (app, state) = setup_test_app().await;

    let batch = serde_json::json!([
        sample(20.0, 500.0),
        sample(150.0, 500.0),
        sample(30.0, 700.0),
    ]);
    let (status, body) = post_json(&app, "/ingest/batch", batch).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["processed"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["total"], 3);
    assert_eq!(state.processor.total_samples(), 2);
}

#[tokio::test]
async fn test_analyze_reports_latest_and_average() {
    let (app, state) = setup_test_app().await;

    post_json(&app, "/ingest", sample(10.0, 100.0)).await;
    post_json(&app, "/ingest", sample(20.0, 300.0)).await;
    wait_until_applied(&state, 2).await;

    let (status, body) = get_json(&app, "/analyze").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_samples"], 2);
    assert_eq!(body["window_size"], 50);
    assert_eq!(body["signals"]["cpu"]["current"], 20.0);
    assert_eq!(body["signals"]["cpu"]["average"], 15.0);
    assert_eq!(body["signals"]["rps"]["average"], 200.0);
}

#[tokio::test]
async fn test_anomalies_counts_outlier() {
    let (app, state) = setup_test_app().await;

    for cpu in [10.0, 12.0, 9.0, 11.0, 10.0, 50.0] {
        let (status, _) = post_json(&app, "/ingest", sample(cpu, 1000.0)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    wait_until_applied(&state, 6).await;

    let (status, body) = get_json(&app, "/anomalies").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["anomalies"]["cpu"], 1);
    assert_eq!(body["anomalies"]["rps"], 0);
    assert_eq!(body["total"], 1);
    assert_eq!(body["threshold"], 2.0);
    assert_eq!(body["window_size"], 50);
    assert_eq!(state.metrics.anomalies_detected("cpu"), 1);
}

#[tokio::test]
async fn test_stats_includes_queue_statistics() {
    let (app, state) = setup_test_app().await;

    post_json(&app, "/ingest", sample(40.0, 800.0)).await;
    wait_until_applied(&state, 1).await;

    let (status, body) = get_json(&app, "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_samples"], 1);
    assert_eq!(body["zscore_threshold"], 2.0);
    assert_eq!(body["current"]["cpu"], 40.0);
    assert_eq!(body["averages"]["rps"], 800.0);
    assert_eq!(body["predictions"]["cpu"], 40.0);
    assert_eq!(body["total_anomalies"], 0);
    assert_eq!(body["queue"]["total_samples"], 1);
    assert_eq!(body["queue"]["applied"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() {
    let (app, state) = setup_test_app().await;

    post_json(&app, "/ingest", sample(40.0, 800.0)).await;
    send(
        &app,
        Request::builder()
            .uri("/does-not-exist")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    wait_until_applied(&state, 1).await;

    let (status, body) = send(
        &app,
        Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("samples_processed_total 1"));
    assert!(text.contains("signal_current{signal=\"cpu\"} 40"));
    assert!(text.contains("http_requests_total"));
    assert!(text.contains("endpoint=\"/ingest\""));
    assert!(text.contains("endpoint=\"other\""));
    assert!(text.contains("http_errors_total"));
}

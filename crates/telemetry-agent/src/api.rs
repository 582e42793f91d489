//! HTTP API for sample ingestion, analytics, health checks and Prometheus metrics

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use telemetry_core::{
    health::{ComponentStatus, HealthRegistry},
    observability::ServiceMetrics,
    processor::{ProcessorError, ProcessorStats, StreamProcessor},
    Sample,
};
use thiserror::Error;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<StreamProcessor>,
    pub metrics: ServiceMetrics,
    pub health: HealthRegistry,
}

impl AppState {
    pub fn new(
        processor: Arc<StreamProcessor>,
        metrics: ServiceMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            processor,
            metrics,
            health,
        }
    }
}

/// Sample as submitted by clients
///
/// Signals other than `cpu` and `rps` may be passed as extra numeric fields.
/// Other extra fields, such as device tags or nulls, are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleInput {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub rps: f64,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reasons a submitted sample is rejected
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("timestamp is required")]
    MissingTimestamp,
    #[error("cpu must be between 0 and 100")]
    CpuOutOfRange,
    #[error("rps must be non-negative")]
    NegativeRps,
    #[error("invalid timestamp format, use RFC3339")]
    InvalidTimestamp,
}

impl SampleInput {
    /// Check bounds and parse the timestamp
    pub fn validate(&self) -> Result<Sample, ValidationError> {
        if self.timestamp.is_empty() {
            return Err(ValidationError::MissingTimestamp);
        }
        if !(0.0..=100.0).contains(&self.cpu) {
            return Err(ValidationError::CpuOutOfRange);
        }
        if self.rps < 0.0 {
            return Err(ValidationError::NegativeRps);
        }

        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|_| ValidationError::InvalidTimestamp)?
            .with_timezone(&Utc);

        let sample = Sample::cpu_rps(timestamp, self.cpu, self.rps);
        Ok(self
            .extra
            .iter()
            .filter_map(|(signal, value)| {
                value
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .map(|v| (signal, v))
            })
            .fold(sample, |sample, (signal, value)| {
                sample.with_value(signal.clone(), value)
            }))
    }
}

/// Errors returned to HTTP clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body")]
    InvalidBody,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Unavailable(#[from] ProcessorError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidBody | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    processed: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct BatchResponse {
    status: &'static str,
    processed: usize,
    failed: usize,
    total: usize,
}

#[derive(Debug, Serialize)]
struct AnomaliesResponse {
    anomalies: BTreeMap<String, u64>,
    total: u64,
    threshold: f64,
    window_size: usize,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    total_samples: u64,
    window_size: usize,
    zscore_threshold: f64,
    current: BTreeMap<String, Option<f64>>,
    averages: BTreeMap<String, f64>,
    predictions: BTreeMap<String, f64>,
    anomalies: BTreeMap<String, u64>,
    total_anomalies: u64,
    queue: ProcessorStats,
}

/// Accept a single sample
async fn ingest(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SampleInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = payload.map_err(|_| ApiError::InvalidBody)?;
    let sample = input.validate()?;
    let timestamp = sample.timestamp();

    state.processor.process_sample(sample)?;
    state.metrics.inc_samples_processed();

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status: "accepted",
            timestamp,
            processed: Utc::now(),
        }),
    ))
}

/// Accept many samples; invalid or rejected entries are counted, not fatal
async fn ingest_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<SampleInput>>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(inputs) = payload.map_err(|_| ApiError::InvalidBody)?;

    let mut processed = 0;
    let mut failed = 0;
    for input in &inputs {
        let accepted = input
            .validate()
            .map_err(ApiError::from)
            .and_then(|sample| {
                state
                    .processor
                    .process_sample(sample)
                    .map_err(ApiError::from)
            });
        match accepted {
            Ok(_) => {
                state.metrics.inc_samples_processed();
                processed += 1;
            }
            Err(_) => failed += 1,
        }
    }

    Ok(Json(BatchResponse {
        status: "completed",
        processed,
        failed,
        total: inputs.len(),
    }))
}

async fn analyze(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.processor.analytics())
}

async fn anomalies(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let anomalies = state.processor.anomaly_counts();
    let config = state.processor.config();

    Json(AnomaliesResponse {
        total: anomalies.values().sum(),
        anomalies,
        threshold: config.zscore_threshold,
        window_size: config.window_size,
    })
}

async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.processor.analytics();

    let mut current = BTreeMap::new();
    let mut averages = BTreeMap::new();
    let mut predictions = BTreeMap::new();
    let mut anomalies = BTreeMap::new();
    for (signal, view) in &snapshot.signals {
        current.insert(signal.clone(), view.current);
        averages.insert(signal.clone(), view.average);
        predictions.insert(signal.clone(), view.predicted);
        anomalies.insert(signal.clone(), view.anomaly_count);
    }

    Json(StatsResponse {
        total_samples: snapshot.total_samples,
        window_size: snapshot.window_size,
        zscore_threshold: snapshot.threshold,
        current,
        averages,
        predictions,
        total_anomalies: anomalies.values().sum(),
        anomalies,
        queue: state.processor.stats(),
    })
}

/// Health check response - returns 200 if healthy, 503 if degraded/unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.metrics.update_signals(&state.processor.analytics());
    state.metrics.update_processor_stats(&state.processor.stats());

    let buffer = state.metrics.encode().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        ApiError::Internal(e.to_string())
    })?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Record request count, latency, in-flight requests and errors
async fn track_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if path == "/metrics" {
        return next.run(request).await;
    }

    let endpoint = normalize_endpoint(path);
    let method = request.method().to_string();
    let start = Instant::now();

    state.metrics.request_started();
    let response = next.run(request).await;
    state.metrics.request_finished(
        &method,
        endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

/// Collapse a request path to its first segment so label cardinality stays
/// bounded
pub fn normalize_endpoint(path: &str) -> &'static str {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or("");
    match first {
        "" => "/",
        "ingest" => "/ingest",
        "analyze" => "/analyze",
        "anomalies" => "/anomalies",
        "stats" => "/stats",
        "healthz" => "/healthz",
        "readyz" => "/readyz",
        "metrics" => "/metrics",
        _ => "other",
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/ingest/batch", post(ingest_batch))
        .route("/analyze", get(analyze))
        .route("/anomalies", get(anomalies))
        .route("/stats", get(stats))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state)
}

/// Start the API server and run until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(timestamp: &str, cpu: f64, rps: f64) -> SampleInput {
        SampleInput {
            timestamp: timestamp.to_string(),
            cpu,
            rps,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_validate_accepts_bounds() {
        let sample = input("2024-01-01T00:00:00Z", 100.0, 0.0).validate().unwrap();
        assert_eq!(sample.value("cpu"), Some(100.0));
        assert_eq!(sample.value("rps"), Some(0.0));

        assert!(input("2024-01-01T00:00:00Z", 0.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejections() {
        assert_eq!(
            input("", 50.0, 10.0).validate().unwrap_err(),
            ValidationError::MissingTimestamp
        );
        assert_eq!(
            input("2024-01-01T00:00:00Z", 100.5, 10.0)
                .validate()
                .unwrap_err(),
            ValidationError::CpuOutOfRange
        );
        assert_eq!(
            input("2024-01-01T00:00:00Z", -0.1, 10.0)
                .validate()
                .unwrap_err(),
            ValidationError::CpuOutOfRange
        );
        assert_eq!(
            input("2024-01-01T00:00:00Z", 50.0, -1.0)
                .validate()
                .unwrap_err(),
            ValidationError::NegativeRps
        );
        assert_eq!(
            input("yesterday", 50.0, 10.0).validate().unwrap_err(),
            ValidationError::InvalidTimestamp
        );
    }

    #[test]
    fn test_validate_normalizes_offset_to_utc() {
        let sample = input("2024-01-01T02:00:00+02:00", 50.0, 10.0)
            .validate()
            .unwrap();
        assert_eq!(sample.timestamp().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_extra_signals_are_carried() {
        let parsed: SampleInput = serde_json::from_str(
            r#"{"timestamp":"2024-01-01T00:00:00Z","cpu":10,"rps":5,"memory":512.5}"#,
        )
        .unwrap();
        let sample = parsed.validate().unwrap();
        assert_eq!(sample.value("memory"), Some(512.5));
    }

    #[test]
    fn test_non_numeric_extra_fields_are_ignored() {
        let parsed: SampleInput = serde_json::from_str(
            r#"{"timestamp":"2024-01-01T00:00:00Z","cpu":10,"rps":5,
                "device_id":"sensor-7","memory":null,"tags":["edge"],"disk":3}"#,
        )
        .unwrap();
        let sample = parsed.validate().unwrap();
        assert_eq!(sample.value("cpu"), Some(10.0));
        assert_eq!(sample.value("disk"), Some(3.0));
        assert_eq!(sample.value("device_id"), None);
        assert_eq!(sample.value("memory"), None);
        assert_eq!(sample.value("tags"), None);
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/ingest"), "/ingest");
        assert_eq!(normalize_endpoint("/ingest/batch"), "/ingest");
        assert_eq!(normalize_endpoint("/stats"), "/stats");
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(normalize_endpoint("/wp-admin/login.php"), "other");
    }
}

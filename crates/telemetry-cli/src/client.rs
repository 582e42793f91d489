//! API client for communicating with the telemetry service

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the telemetry service
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request and parse the body whatever the status code
    ///
    /// Health endpoints answer 503 with a JSON body that is still worth
    /// rendering.
    pub async fn get_with_status<T: DeserializeOwned>(&self, path: &str) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn analytics(&self) -> Result<AnalyticsSnapshot> {
        self.get("analyze").await
    }

    pub async fn anomalies(&self) -> Result<AnomalyCounts> {
        self.get("anomalies").await
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        self.get("stats").await
    }

    pub async fn health(&self) -> Result<(StatusCode, HealthReport)> {
        self.get_with_status("healthz").await
    }

    pub async fn readiness(&self) -> Result<(StatusCode, Readiness)> {
        self.get_with_status("readyz").await
    }

    pub async fn ingest(&self, sample: &SampleRequest) -> Result<IngestResponse> {
        self.post("ingest", sample).await
    }

    pub async fn ingest_batch(&self, samples: &[SampleRequest]) -> Result<BatchResponse> {
        self.post("ingest/batch", &samples).await
    }
}

// API request/response types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    pub timestamp: String,
    pub cpu: f64,
    pub rps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub timestamp: String,
    pub processed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub status: String,
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalAnalytics {
    pub current: Option<f64>,
    pub average: f64,
    pub predicted: f64,
    pub z_score: f64,
    pub anomaly: bool,
    pub anomaly_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub signals: BTreeMap<String, SignalAnalytics>,
    pub total_samples: u64,
    pub window_size: usize,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sample_at: Option<String>,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyCounts {
    pub anomalies: BTreeMap<String, u64>,
    pub total: u64,
    pub threshold: f64,
    pub window_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub total_samples: u64,
    pub queued: u64,
    pub inline: u64,
    pub applied: u64,
    pub anomaly_events_dropped: u64,
    pub anomaly_events_dispatched: u64,
    pub sink_failures: u64,
    pub discarded_on_shutdown: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub total_samples: u64,
    pub window_size: usize,
    pub zscore_threshold: f64,
    pub current: BTreeMap<String, Option<f64>>,
    pub averages: BTreeMap<String, f64>,
    pub predictions: BTreeMap<String, f64>,
    pub anomalies: BTreeMap<String, u64>,
    pub total_anomalies: u64,
    #[serde(default)]
    pub queue: QueueStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub components: BTreeMap<String, ComponentReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_analytics_parses_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/analyze")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "signals": {
                        "cpu": {"current": 50.0, "average": 12.5, "predicted": 12.5,
                                "z_score": 3.9, "anomaly": true, "anomaly_count": 1}
                    },
                    "total_samples": 6,
                    "window_size": 50,
                    "threshold": 2.0,
                    "last_sample_at": "2024-01-01T00:00:00Z",
                    "last_updated": "2024-01-01T00:00:01Z"
                }"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let snapshot = client.analytics().await.unwrap();

        mock.assert_async().await;
        assert_eq!(snapshot.total_samples, 6);
        let cpu = &snapshot.signals["cpu"];
        assert!(cpu.anomaly);
        assert_eq!(cpu.current, Some(50.0));
        assert_eq!(cpu.anomaly_count, 1);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/ingest")
            .with_status(400)
            .with_body(r#"{"error":"cpu must be between 0 and 100"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let sample = SampleRequest {
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            cpu: 120.0,
            rps: 10.0,
        };
        let err = client.ingest(&sample).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("cpu must be between 0 and 100"));
    }

    #[tokio::test]
    async fn test_ingest_sends_json_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "timestamp": "2024-01-01T00:00:00Z",
                "cpu": 42.0,
                "rps": 900.0,
            })))
            .with_status(202)
            .with_body(
                r#"{"status":"accepted","timestamp":"2024-01-01T00:00:00Z","processed":"2024-01-01T00:00:00.5Z"}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let response = client
            .ingest(&SampleRequest {
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                cpu: 42.0,
                rps: 900.0,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status, "accepted");
    }

    #[tokio::test]
    async fn test_health_body_read_on_503() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"sample_worker":
                    {"status":"unhealthy","message":"stopped","last_check_timestamp":1}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let (status, report) = client.health().await.unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, "unhealthy");
        assert_eq!(
            report.components["sample_worker"].message.as_deref(),
            Some("stopped")
        );
    }
}

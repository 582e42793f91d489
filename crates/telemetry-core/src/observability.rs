//! Observability infrastructure for the telemetry service
//!
//! Provides:
//! - Prometheus metrics held in an explicitly constructed registry
//!   (anomaly counters, signal gauges, queue statistics, HTTP request metrics)
//! - Structured JSON logging with tracing

use anyhow::Result;
use async_trait::async_trait;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tracing::{info, warn};

use crate::models::{AnalyticsSnapshot, AnomalyEvent, AnomalySeverity};
use crate::processor::{AnomalySink, NotifySink, ProcessorConfig, ProcessorStats};

/// Histogram buckets for HTTP request latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Prometheus metrics for the service
///
/// Clones share the same underlying metrics and registry.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    anomalies_detected: IntCounterVec,
    samples_processed: IntCounter,
    samples_queued: IntGauge,
    samples_inline: IntGauge,
    samples_applied: IntGauge,
    anomaly_events_dropped: IntGauge,
    signal_current: GaugeVec,
    signal_average: GaugeVec,
    signal_zscore: GaugeVec,
    http_requests: IntCounterVec,
    http_request_duration: HistogramVec,
    http_active_requests: IntGauge,
    http_errors: IntCounterVec,
}

impl ServiceMetrics {
    /// Create the metrics and register them in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Create the metrics and register them in `registry`
    pub fn with_registry(registry: Registry) -> prometheus::Result<Self> {
        let anomalies_detected = IntCounterVec::new(
            Opts::new(
                "anomaly_detected_total",
                "Total number of detected anomalies",
            ),
            &["signal"],
        )?;
        let samples_processed = IntCounter::new(
            "samples_processed_total",
            "Total number of samples accepted for processing",
        )?;
        let samples_queued = IntGauge::new(
            "stream_samples_queued",
            "Samples handed to the background worker",
        )?;
        let samples_inline = IntGauge::new(
            "stream_samples_inline",
            "Samples applied inline because the queue was full",
        )?;
        let samples_applied = IntGauge::new(
            "stream_samples_applied",
            "Samples applied to the signal windows",
        )?;
        let anomaly_events_dropped = IntGauge::new(
            "stream_anomaly_events_dropped",
            "Anomaly events dropped because the event queue was full",
        )?;
        let signal_current = GaugeVec::new(
            Opts::new("signal_current", "Latest value of each signal"),
            &["signal"],
        )?;
        let signal_average = GaugeVec::new(
            Opts::new("signal_avg", "Rolling average of each signal"),
            &["signal"],
        )?;
        let signal_zscore = GaugeVec::new(
            Opts::new("signal_zscore", "Z-score of the latest value of each signal"),
            &["signal"],
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "endpoint"],
        )?;
        let http_active_requests =
            IntGauge::new("http_active_requests", "Number of active HTTP requests")?;
        let http_errors = IntCounterVec::new(
            Opts::new("http_errors_total", "Total number of HTTP errors"),
            &["method", "endpoint", "status"],
        )?;

        registry.register(Box::new(anomalies_detected.clone()))?;
        registry.register(Box::new(samples_processed.clone()))?;
        registry.register(Box::new(samples_queued.clone()))?;
        registry.register(Box::new(samples_inline.clone()))?;
        registry.register(Box::new(samples_applied.clone()))?;
        registry.register(Box::new(anomaly_events_dropped.clone()))?;
        registry.register(Box::new(signal_current.clone()))?;
        registry.register(Box::new(signal_average.clone()))?;
        registry.register(Box::new(signal_zscore.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(http_active_requests.clone()))?;
        registry.register(Box::new(http_errors.clone()))?;

        Ok(Self {
            registry,
            anomalies_detected,
            samples_processed,
            samples_queued,
            samples_inline,
            samples_applied,
            anomaly_events_dropped,
            signal_current,
            signal_average,
            signal_zscore,
            http_requests,
            http_request_duration,
            http_active_requests,
            http_errors,
        })
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn record_anomaly(&self, signal: &str) {
        self.anomalies_detected.with_label_values(&[signal]).inc();
    }

    pub fn anomalies_detected(&self, signal: &str) -> u64 {
        self.anomalies_detected.with_label_values(&[signal]).get()
    }

    pub fn inc_samples_processed(&self) {
        self.samples_processed.inc();
    }

    /// Refresh the per-signal gauges from an analytics snapshot
    pub fn update_signals(&self, snapshot: &AnalyticsSnapshot) {
        for (signal, view) in &snapshot.signals {
            self.signal_current
                .with_label_values(&[signal])
                .set(view.current.unwrap_or_default());
            self.signal_average
                .with_label_values(&[signal])
                .set(view.average);
            self.signal_zscore
                .with_label_values(&[signal])
                .set(view.z_score);
        }
    }

    /// Refresh the queue gauges from processor statistics
    pub fn update_processor_stats(&self, stats: &ProcessorStats) {
        self.samples_queued.set(saturating_i64(stats.queued));
        self.samples_inline.set(saturating_i64(stats.inline));
        self.samples_applied.set(saturating_i64(stats.applied));
        self.anomaly_events_dropped
            .set(saturating_i64(stats.anomaly_events_dropped));
    }

    pub fn request_started(&self) {
        self.http_active_requests.inc();
    }

    /// Record a finished HTTP request
    pub fn request_finished(&self, method: &str, endpoint: &str, status: u16, duration_secs: f64) {
        let status = status.to_string();
        self.http_active_requests.dec();
        self.http_requests
            .with_label_values(&[method, endpoint, &status])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, endpoint])
            .observe(duration_secs);
        if status.starts_with('4') || status.starts_with('5') {
            self.http_errors
                .with_label_values(&[method, endpoint, &status])
                .inc();
        }
    }
}

impl NotifySink for ServiceMetrics {
    fn notify(&self, signal: &str) -> Result<()> {
        self.record_anomaly(signal);
        Ok(())
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Structured logger for service events
///
/// Provides consistent JSON-formatted logging for anomalies and
/// lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, event: &AnomalyEvent) {
        let severity = event.severity();
        match severity {
            AnomalySeverity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    service = %self.service_name,
                    signal = %event.signal,
                    severity = %severity,
                    value = event.value,
                    z_score = event.z_score,
                    mean = event.mean,
                    std_dev = event.std_dev,
                    sample_timestamp = %event.timestamp.to_rfc3339(),
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    service = %self.service_name,
                    signal = %event.signal,
                    severity = %severity,
                    value = event.value,
                    z_score = event.z_score,
                    mean = event.mean,
                    std_dev = event.std_dev,
                    sample_timestamp = %event.timestamp.to_rfc3339(),
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, config: &ProcessorConfig) {
        info!(
            event = "service_started",
            service = %self.service_name,
            version = %version,
            signals = ?config.signals,
            window_size = config.window_size,
            zscore_threshold = config.zscore_threshold,
            buffer_size = config.sample_buffer_size,
            "Telemetry service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str, stats: &ProcessorStats) {
        info!(
            event = "service_shutdown",
            service = %self.service_name,
            reason = %reason,
            total_samples = stats.total_samples,
            inline_samples = stats.inline,
            discarded = stats.discarded_on_shutdown,
            "Telemetry service shutting down"
        );
    }
}

#[async_trait]
impl AnomalySink for StructuredLogger {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &AnomalyEvent) -> Result<()> {
        self.log_anomaly(event);
        Ok(())
    }
}

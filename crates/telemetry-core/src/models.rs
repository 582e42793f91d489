//! Core data models for the telemetry stream

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known signal names
pub mod signals {
    pub const CPU: &str = "cpu";
    pub const RPS: &str = "rps";
}

/// A single telemetry reading: a timestamp plus named signal values
///
/// Serialized flat, e.g. `{"timestamp": "...", "cpu": 42.0, "rps": 900.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
}

impl Sample {
    /// Create a sample with no signal values
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Sample carrying the reference `cpu` and `rps` signals
    pub fn cpu_rps(timestamp: DateTime<Utc>, cpu: f64, rps: f64) -> Self {
        Self::new(timestamp)
            .with_value(signals::CPU, cpu)
            .with_value(signals::RPS, rps)
    }

    /// Attach a signal value
    pub fn with_value(mut self, signal: impl Into<String>, value: f64) -> Self {
        self.values.insert(signal.into(), value);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Value of `signal`, if the sample carries it
    pub fn value(&self, signal: &str) -> Option<f64> {
        self.values.get(signal).copied()
    }

    /// All signal values, ordered by name
    pub fn values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// Severity of an anomaly, derived from the magnitude of its z-score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Warning,
    High,
    Critical,
}

impl std::fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalySeverity::Warning => write!(f, "warning"),
            AnomalySeverity::High => write!(f, "high"),
            AnomalySeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A detected anomaly together with the window statistics at detection time
///
/// `mean` and `std_dev` describe the window the value was scored against,
/// i.e. before the value itself was added, so that
/// `z_score == (value - mean) / std_dev`. They do not include the anomalous
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub timestamp: DateTime<Utc>,
    pub signal: String,
    pub value: f64,
    pub z_score: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl AnomalyEvent {
    /// Severity level based on the absolute z-score
    pub fn severity(&self) -> AnomalySeverity {
        let magnitude = self.z_score.abs();
        if magnitude >= 5.0 {
            AnomalySeverity::Critical
        } else if magnitude >= 4.0 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Warning
        }
    }
}

/// Per-signal view inside an [`AnalyticsSnapshot`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalAnalytics {
    /// Value carried by the latest accepted sample
    pub current: Option<f64>,
    pub average: f64,
    pub predicted: f64,
    pub z_score: f64,
    pub anomaly: bool,
    pub anomaly_count: u64,
}

/// Point-in-time analytics across all tracked signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub signals: BTreeMap<String, SignalAnalytics>,
    pub total_samples: u64,
    pub window_size: usize,
    pub threshold: f64,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_serializes_flat() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let sample = Sample::cpu_rps(ts, 42.5, 900.0);

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["cpu"], 42.5);
        assert_eq!(json["rps"], 900.0);
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");

        let back: Sample = serde_json::from_value(json).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_sample_missing_signal() {
        let sample = Sample::new(Utc::now()).with_value(signals::CPU, 10.0);
        assert_eq!(sample.value(signals::CPU), Some(10.0));
        assert_eq!(sample.value(signals::RPS), None);
        assert_eq!(sample.values().count(), 1);
    }

    #[test]
    fn test_anomaly_severity() {
        let event = AnomalyEvent {
            timestamp: Utc::now(),
            signal: signals::CPU.to_string(),
            value: 99.0,
            z_score: 5.5,
            mean: 40.0,
            std_dev: 10.0,
        };
        assert_eq!(event.severity(), AnomalySeverity::Critical);

        let high = AnomalyEvent {
            z_score: -4.2,
            ..event.clone()
        };
        assert_eq!(high.severity(), AnomalySeverity::High);

        let warning = AnomalyEvent {
            z_score: 2.5,
            ..event
        };
        assert_eq!(warning.severity(), AnomalySeverity::Warning);
    }
}

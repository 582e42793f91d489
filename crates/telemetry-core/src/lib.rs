//! Streaming telemetry analytics
//!
//! This crate provides the core functionality for:
//! - Sliding-window rolling averages and z-score anomaly detection
//! - Concurrent sample processing with a no-drop overload policy
//! - Best-effort anomaly event dispatch
//! - Health checks and observability

pub mod analytics;
pub mod health;
pub mod models;
pub mod observability;
pub mod processor;

pub use analytics::{RollingAverage, Verdict, WindowStats, ZScoreDetector};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ServiceMetrics, StructuredLogger};
pub use processor::{
    Admission, AnomalySink, NotifySink, ProcessorConfig, ProcessorError, ProcessorState,
    ProcessorStats, StreamProcessor, StreamProcessorBuilder,
};

//! Telemetry agent HTTP service
//!
//! Exposes sample ingestion, analytics queries, health checks and
//! Prometheus metrics over a [`telemetry_core::StreamProcessor`].

pub mod api;
pub mod config;

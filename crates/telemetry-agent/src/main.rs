//! Telemetry Agent - streaming telemetry analytics service
//!
//! Accepts cpu/rps samples over HTTP, maintains rolling averages and
//! z-score anomaly detection per signal, and exposes analytics, health
//! and Prometheus metrics.

use std::sync::Arc;

use anyhow::{Context, Result};
use telemetry_agent::{api, config::ServiceConfig};
use telemetry_core::{
    health::{components, HealthRegistry},
    observability::{ServiceMetrics, StructuredLogger},
    processor::StreamProcessor,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting telemetry-agent");

    let config = ServiceConfig::load().context("Failed to load configuration")?;
    let processor_config = config.processor_config();

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLE_WORKER).await;
    health_registry.register(components::ANOMALY_DISPATCH).await;

    let metrics = ServiceMetrics::new().context("Failed to register metrics")?;
    let logger = StructuredLogger::new(&config.service_name);

    let processor = Arc::new(
        StreamProcessor::builder()
            .config(processor_config.clone())
            .notifier(Arc::new(metrics.clone()))
            .sink(Arc::new(logger.clone()))
            .health(health_registry.clone())
            .build()
            .context("Failed to build stream processor")?,
    );
    processor
        .start()
        .context("Failed to start stream processor")?;
    logger.log_startup(SERVICE_VERSION, &processor_config);

    let app_state = Arc::new(api::AppState::new(
        processor.clone(),
        metrics,
        health_registry.clone(),
    ));

    // Mark service as ready after initialization
    health_registry.set_ready(true).await;

    let served = api::serve(config.port, app_state, shutdown_signal()).await;
    health_registry.set_ready(false).await;

    processor.stop().await;
    logger.log_shutdown("signal received", &processor.stats());

    if let Err(e) = &served {
        error!(error = %e, "API server failed");
    }
    served
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

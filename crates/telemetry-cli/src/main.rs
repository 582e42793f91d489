//! Telemetry Stream CLI
//!
//! A command-line tool for querying analytics, sending samples and
//! generating load against the streaming telemetry service.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{load, query, send};

/// Telemetry Stream CLI
#[derive(Parser)]
#[command(name = "tsctl")]
#[command(author, version, about = "CLI for the Telemetry Stream analytics service", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via TELEMETRY_API_URL env var)
    #[arg(long, env = "TELEMETRY_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show rolling averages, z-scores and anomaly flags per signal
    Analyze,

    /// Show anomaly counts per signal
    Anomalies,

    /// Show service statistics including queue counters
    Stats,

    /// Show service health and readiness
    Health,

    /// Send a single sample
    Send {
        /// CPU utilization in percent (0-100)
        #[arg(long)]
        cpu: f64,

        /// Requests per second
        #[arg(long)]
        rps: f64,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Generate load against the ingestion endpoints
    Load {
        /// Total number of samples to send
        #[arg(long, short = 'n', default_value_t = 1000)]
        requests: usize,

        /// Number of concurrent workers
        #[arg(long, short, default_value_t = 10)]
        concurrency: usize,

        /// Samples per request (1 uses the single-sample endpoint)
        #[arg(long, short, default_value_t = 1)]
        batch_size: usize,

        /// Fraction of samples that are outliers (0-1)
        #[arg(long, default_value_t = 0.1)]
        anomaly_rate: f64,

        /// Seed for a reproducible sample stream
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Analyze => query::show_analytics(&client, cli.format).await?,
        Commands::Anomalies => query::show_anomalies(&client, cli.format).await?,
        Commands::Stats => query::show_stats(&client, cli.format).await?,
        Commands::Health => query::show_health(&client, cli.format).await?,
        Commands::Send {
            cpu,
            rps,
            timestamp,
        } => {
            send::send_sample(&client, cpu, rps, timestamp, cli.format).await?;
        }
        Commands::Load {
            requests,
            concurrency,
            batch_size,
            anomaly_rate,
            seed,
        } => {
            let options = load::LoadOptions {
                requests,
                concurrency,
                batch_size,
                anomaly_rate,
                seed,
            };
            load::generate_load(&client, options, cli.format).await?;
        }
    }

    Ok(())
}

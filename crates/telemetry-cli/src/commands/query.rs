//! Read-only commands: analytics, anomalies, stats and health

use anyhow::Result;
use reqwest::StatusCode;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_anomaly, color_status, color_zscore, format_value, print_error, print_info, print_json,
    print_rows, print_success, print_warning, OutputFormat,
};

/// Row for the analytics table
#[derive(Tabled)]
struct SignalRow {
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Average")]
    average: String,
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Z-Score")]
    z_score: String,
    #[tabled(rename = "Anomaly")]
    anomaly: String,
    #[tabled(rename = "Anomalies")]
    anomaly_count: u64,
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Anomalies")]
    count: u64,
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Average")]
    average: String,
    #[tabled(rename = "Prediction")]
    prediction: String,
    #[tabled(rename = "Anomalies")]
    anomalies: u64,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show per-signal analytics
pub async fn show_analytics(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.analytics().await?;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => {
            if snapshot.total_samples == 0 {
                print_warning("No samples ingested yet");
                return Ok(());
            }

            let rows: Vec<SignalRow> = snapshot
                .signals
                .iter()
                .map(|(signal, view)| SignalRow {
                    signal: signal.clone(),
                    current: format_value(view.current),
                    average: format!("{:.2}", view.average),
                    predicted: format!("{:.2}", view.predicted),
                    z_score: color_zscore(view.z_score, snapshot.threshold),
                    anomaly: color_anomaly(view.anomaly),
                    anomaly_count: view.anomaly_count,
                })
                .collect();

            print_rows(rows);
            println!(
                "\nSamples: {} | Window: {} | Threshold: {:.2}",
                snapshot.total_samples, snapshot.window_size, snapshot.threshold
            );
            if let Some(last) = &snapshot.last_sample_at {
                println!("Last sample: {}", last);
            }
        }
    }

    Ok(())
}

/// Show anomaly counts per signal
pub async fn show_anomalies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let counts = client.anomalies().await?;

    match format {
        OutputFormat::Json => print_json(&counts)?,
        OutputFormat::Table => {
            let rows: Vec<CountRow> = counts
                .anomalies
                .iter()
                .map(|(signal, count)| CountRow {
                    signal: signal.clone(),
                    count: *count,
                })
                .collect();

            print_rows(rows);
            println!(
                "\nTotal: {} anomalies (|z| > {:.2}, window {})",
                counts.total, counts.threshold, counts.window_size
            );
        }
    }

    Ok(())
}

/// Show service statistics
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.stats().await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            let rows: Vec<StatsRow> = stats
                .averages
                .iter()
                .map(|(signal, average)| StatsRow {
                    signal: signal.clone(),
                    current: format_value(stats.current.get(signal).copied().flatten()),
                    average: format!("{:.2}", average),
                    prediction: format_value(stats.predictions.get(signal).copied()),
                    anomalies: stats.anomalies.get(signal).copied().unwrap_or_default(),
                })
                .collect();

            print_rows(rows);

            let queue = &stats.queue;
            println!("\nTotal samples:      {}", stats.total_samples);
            println!("Total anomalies:    {}", stats.total_anomalies);
            println!("Window size:        {}", stats.window_size);
            println!("Z-score threshold:  {:.2}", stats.zscore_threshold);
            println!(
                "Queue:              {} queued, {} inline, {} applied",
                queue.queued, queue.inline, queue.applied
            );
            println!(
                "Anomaly events:     {} dispatched, {} dropped, {} sink failures",
                queue.anomaly_events_dispatched, queue.anomaly_events_dropped, queue.sink_failures
            );
            if queue.inline > 0 {
                print_info("Some samples were applied inline because the queue was full");
            }
        }
    }

    Ok(())
}

/// Show health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (health_status, health) = client.health().await?;
    let (_, readiness) = client.readiness().await?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&component.status),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();

            if !rows.is_empty() {
                print_rows(rows);
                println!();
            }

            if health_status == StatusCode::OK {
                print_success(&format!("Service is {}", color_status(&health.status)));
            } else {
                print_error(&format!("Service is {}", color_status(&health.status)));
            }

            if readiness.ready {
                print_success("Ready to accept traffic");
            } else {
                print_warning(&format!(
                    "Not ready: {}",
                    readiness.reason.as_deref().unwrap_or("unknown reason")
                ));
            }
        }
    }

    Ok(())
}

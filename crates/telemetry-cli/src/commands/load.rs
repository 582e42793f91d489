//! Load generator for the ingestion endpoints
//!
//! Spreads a fixed number of samples over concurrent workers. Each worker
//! posts either single samples to `/ingest` or batches to `/ingest/batch`,
//! mixing in outliers at the requested rate.

use std::ops::{Range, RangeInclusive};
use std::time::Instant;

use anyhow::{bail, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinSet;

use super::send::now_rfc3339;
use crate::client::{ApiClient, SampleRequest};
use crate::output::{format_rate, print_info, print_json, print_success, print_warning, OutputFormat};

const CPU_RANGE: Range<f64> = 20.0..95.0;
const RPS_RANGE: RangeInclusive<u32> = 500..=2000;

/// Load run parameters
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Total number of samples to send
    pub requests: usize,
    pub concurrency: usize,
    /// Samples per request; 1 uses the single-sample endpoint
    pub batch_size: usize,
    /// Fraction of samples that are outliers
    pub anomaly_rate: f64,
    /// Seed for reproducible sample streams
    pub seed: Option<u64>,
}

impl LoadOptions {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.anomaly_rate) {
            bail!("anomaly rate must be between 0 and 1");
        }
        Ok(())
    }
}

/// Outcome of a load run
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Samples generated
    pub samples: u64,
    /// Samples the service accepted
    pub accepted: u64,
    /// Samples rejected or lost to request errors
    pub failed: u64,
    /// HTTP requests issued
    pub requests: u64,
    /// Requests that failed outright
    pub errors: u64,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.samples += other.samples;
        self.accepted += other.accepted;
        self.failed += other.failed;
        self.requests += other.requests;
        self.errors += other.errors;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
    }

    fn record_error(&mut self, samples: u64, error: anyhow::Error) {
        self.failed += samples;
        self.errors += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Generate one sample; outliers fall outside the normal cpu and rps ranges
pub fn generate_sample<R: Rng>(rng: &mut R, anomaly_rate: f64, timestamp: String) -> SampleRequest {
    let (cpu, rps) = if rng.gen_bool(anomaly_rate) {
        let cpu = match rng.gen_range(0..4) {
            0 => 5.0,
            1 => 99.0,
            2 => rng.gen_range(0.0..10.0),
            _ => rng.gen_range(95.0..=100.0),
        };
        let rps = match rng.gen_range(0..4) {
            0 => 50,
            1 => 5000,
            2 => rng.gen_range(0..=100),
            _ => rng.gen_range(4000..=6000),
        };
        (cpu, rps)
    } else {
        (rng.gen_range(CPU_RANGE), rng.gen_range(RPS_RANGE))
    };

    SampleRequest {
        timestamp,
        cpu,
        rps: f64::from(rps),
    }
}

/// Divide `total` samples over `workers` as evenly as possible
pub fn split_requests(total: usize, workers: usize) -> Vec<usize> {
    let base = total / workers;
    let extra = total % workers;
    (0..workers)
        .map(|index| base + usize::from(index < extra))
        .collect()
}

/// Run the load and collect the combined report
pub async fn run_load(client: &ApiClient, options: &LoadOptions) -> Result<LoadReport> {
    options.validate()?;

    let start = Instant::now();
    let mut workers = JoinSet::new();

    for (index, share) in split_requests(options.requests, options.concurrency)
        .into_iter()
        .enumerate()
    {
        if share == 0 {
            continue;
        }

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        };
        workers.spawn(run_worker(
            client.clone(),
            share,
            options.batch_size,
            options.anomaly_rate,
            rng,
        ));
    }

    let mut report = LoadReport::default();
    while let Some(worker) = workers.join_next().await {
        report.merge(worker?);
    }
    report.elapsed_secs = start.elapsed().as_secs_f64();

    Ok(report)
}

async fn run_worker(
    client: ApiClient,
    samples: usize,
    batch_size: usize,
    anomaly_rate: f64,
    mut rng: StdRng,
) -> LoadReport {
    let mut report = LoadReport::default();
    let mut remaining = samples;

    while remaining > 0 {
        let size = remaining.min(batch_size);
        remaining -= size;
        report.requests += 1;
        report.samples += size as u64;

        if batch_size == 1 {
            let sample = generate_sample(&mut rng, anomaly_rate, now_rfc3339());
            match client.ingest(&sample).await {
                Ok(_) => report.accepted += 1,
                Err(e) => report.record_error(1, e),
            }
        } else {
            let batch: Vec<SampleRequest> = (0..size)
                .map(|_| generate_sample(&mut rng, anomaly_rate, now_rfc3339()))
                .collect();
            match client.ingest_batch(&batch).await {
                Ok(response) => {
                    report.accepted += response.processed;
                    report.failed += response.failed;
                }
                Err(e) => report.record_error(size as u64, e),
            }
        }
    }

    report
}

/// Run the load generator and print the report
pub async fn generate_load(
    client: &ApiClient,
    options: LoadOptions,
    format: OutputFormat,
) -> Result<()> {
    options.validate()?;

    if let OutputFormat::Table = format {
        print_info(&format!(
            "Sending {} samples with {} workers (batch size {}, anomaly rate {:.0}%)",
            options.requests,
            options.concurrency,
            options.batch_size,
            options.anomaly_rate * 100.0
        ));
    }

    let report = run_load(client, &options).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            println!("Requests:   {}", report.requests);
            println!("Accepted:   {}", report.accepted);
            println!("Failed:     {}", report.failed);
            println!("Elapsed:    {:.2}s", report.elapsed_secs);
            println!(
                "Throughput: {}",
                format_rate(report.samples, report.elapsed_secs)
            );

            if report.failed == 0 {
                print_success("All samples accepted");
            } else {
                print_warning(&format!(
                    "{} of {} samples failed",
                    report.failed, report.samples
                ));
                if let Some(error) = &report.last_error {
                    println!("Last error: {}", error);
                }
            }
        }
    }

    Ok(())
}

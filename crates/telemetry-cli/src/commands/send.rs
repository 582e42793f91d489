//! Single-sample ingestion

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::client::{ApiClient, SampleRequest};
use crate::output::{print_json, print_success, OutputFormat};

/// Current time in the RFC 3339 form the service expects
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Send one sample to the ingestion endpoint
pub async fn send_sample(
    client: &ApiClient,
    cpu: f64,
    rps: f64,
    timestamp: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let sample = SampleRequest {
        timestamp: timestamp.unwrap_or_else(now_rfc3339),
        cpu,
        rps,
    };

    let response = client.ingest(&sample).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Sample {} (cpu={:.2}, rps={:.2})",
                response.status, sample.cpu, sample.rps
            ));
            println!("Timestamp: {}", response.timestamp);
            println!("Processed: {}", response.processed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_rfc3339_utc() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}

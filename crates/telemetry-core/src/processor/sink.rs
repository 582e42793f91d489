//! Notification seams for detected anomalies
//!
//! Two kinds of collaborators consume anomalies:
//! - [`NotifySink`]: invoked synchronously, once per anomaly, on the path that
//!   applied the sample. Meant for cheap side effects such as counters.
//! - [`AnomalySink`]: receives full [`AnomalyEvent`]s from the dispatch worker.
//!   Delivery is best-effort and at-most-once.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::AnomalyEvent;

/// Synchronous per-anomaly notification
pub trait NotifySink: Send + Sync {
    /// Called with the name of the signal that produced an anomaly
    fn notify(&self, signal: &str) -> Result<()>;
}

/// Notifier that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotifySink for NoopNotifier {
    fn notify(&self, _signal: &str) -> Result<()> {
        Ok(())
    }
}

/// Consumer of anomaly events on the dispatch worker
#[async_trait]
pub trait AnomalySink: Send + Sync {
    /// Short name used in logs and health messages
    fn name(&self) -> &str;

    /// Handle one anomaly event
    async fn handle(&self, event: &AnomalyEvent) -> Result<()>;
}

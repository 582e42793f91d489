//! Background workers and the shared sample-apply pipeline
//!
//! The [`Pipeline`] holds everything the sample-apply path touches. It is
//! shared between the sample worker and producers that fall back to applying
//! samples inline, so both paths run the exact same update logic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::signal::SignalTracker;
use super::sink::{AnomalySink, NotifySink};
use crate::health::{components, HealthRegistry};
use crate::models::{AnomalyEvent, Sample};

/// Shared state behind both admission paths
pub(crate) struct Pipeline {
    pub(crate) signals: Vec<SignalTracker>,
    notifier: Arc<dyn NotifySink>,
    anomaly_tx: mpsc::Sender<AnomalyEvent>,
    pub(crate) applied: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
    pub(crate) events_dispatched: AtomicU64,
    pub(crate) sink_failures: AtomicU64,
    pub(crate) discarded_on_shutdown: AtomicU64,
}

impl Pipeline {
    pub(crate) fn new(
        signals: Vec<SignalTracker>,
        notifier: Arc<dyn NotifySink>,
        anomaly_tx: mpsc::Sender<AnomalyEvent>,
    ) -> Self {
        Self {
            signals,
            notifier,
            anomaly_tx,
            applied: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            discarded_on_shutdown: AtomicU64::new(0),
        }
    }

    pub(crate) fn signal(&self, name: &str) -> Option<&SignalTracker> {
        self.signals.iter().find(|tracker| tracker.name() == name)
    }

    /// Feed every tracked signal present on `sample` into its aggregators
    pub(crate) fn apply(&self, sample: &Sample) {
        for tracker in &self.signals {
            let Some(value) = sample.value(tracker.name()) else {
                continue;
            };

            let update = tracker.update(value);
            if !update.verdict.is_anomaly {
                continue;
            }

            self.notify(tracker.name());

            let event = AnomalyEvent {
                timestamp: sample.timestamp(),
                signal: tracker.name().to_string(),
                value,
                z_score: update.verdict.z_score,
                mean: update.baseline.mean,
                std_dev: update.baseline.std_dev,
            };

            if self.anomaly_tx.try_send(event).is_err() {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    signal = %tracker.name(),
                    value = value,
                    "Anomaly event queue full, dropping event"
                );
            }
        }

        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    fn notify(&self, signal: &str) {
        match catch_unwind(AssertUnwindSafe(|| self.notifier.notify(signal))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(signal = %signal, error = %e, "Anomaly notifier failed");
            }
            Err(_) => {
                error!(signal = %signal, "Anomaly notifier panicked");
            }
        }
    }
}

/// Drains the sample queue into the pipeline
pub(crate) struct SampleWorker {
    pipeline: Arc<Pipeline>,
    receiver: mpsc::Receiver<Sample>,
    health: Option<HealthRegistry>,
}

impl SampleWorker {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        receiver: mpsc::Receiver<Sample>,
        health: Option<HealthRegistry>,
    ) -> Self {
        Self {
            pipeline,
            receiver,
            health,
        }
    }

    /// Run until shutdown is signalled; returns the number of samples left
    /// unapplied in the queue
    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!("Starting sample worker");
        if let Some(health) = &self.health {
            health.set_healthy(components::SAMPLE_WORKER).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down sample worker");
                    break;
                }
                sample = self.receiver.recv() => match sample {
                    Some(sample) => self.pipeline.apply(&sample),
                    None => break,
                },
            }
        }

        let discarded = discard_pending(&mut self.receiver);
        if discarded > 0 {
            warn!(
                discarded = discarded,
                "Discarding queued samples on shutdown"
            );
        }

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::SAMPLE_WORKER, "stopped")
                .await;
        }

        discarded
    }
}

/// Forwards anomaly events to the configured sinks
pub(crate) struct DispatchWorker {
    pipeline: Arc<Pipeline>,
    receiver: mpsc::Receiver<AnomalyEvent>,
    sinks: Vec<Arc<dyn AnomalySink>>,
    health: Option<HealthRegistry>,
}

impl DispatchWorker {
    pub(crate) fn new(
        pipeline: Arc<Pipeline>,
        receiver: mpsc::Receiver<AnomalyEvent>,
        sinks: Vec<Arc<dyn AnomalySink>>,
        health: Option<HealthRegistry>,
    ) -> Self {
        Self {
            pipeline,
            receiver,
            sinks,
            health,
        }
    }

    /// Run until shutdown is signalled; returns the number of events left
    /// undelivered in the queue
    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> u64 {
        info!(sinks = self.sinks.len(), "Starting anomaly dispatch worker");
        if let Some(health) = &self.health {
            health.set_healthy(components::ANOMALY_DISPATCH).await;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Shutting down anomaly dispatch worker");
                    break;
                }
                event = self.receiver.recv() => match event {
                    Some(event) => self.dispatch(&event).await,
                    None => break,
                },
            }
        }

        let discarded = discard_pending(&mut self.receiver);
        if discarded > 0 {
            warn!(
                discarded = discarded,
                "Discarding queued anomaly events on shutdown"
            );
        }

        if let Some(health) = &self.health {
            health
                .set_unhealthy(components::ANOMALY_DISPATCH, "stopped")
                .await;
        }

        discarded
    }

    async fn dispatch(&self, event: &AnomalyEvent) {
        let mut failed = None;

        for sink in &self.sinks {
            if let Err(e) = sink.handle(event).await {
                self.pipeline.sink_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    sink = %sink.name(),
                    signal = %event.signal,
                    value = event.value,
                    error = %e,
                    "Anomaly sink failed, event not retried"
                );
                failed = Some(format!("sink {} failed: {}", sink.name(), e));
            }
        }

        if let Some(health) = &self.health {
            match failed {
                Some(message) => {
                    health
                        .set_degraded(components::ANOMALY_DISPATCH, message)
                        .await
                }
                None => health.set_healthy(components::ANOMALY_DISPATCH).await,
            }
        }

        self.pipeline
            .events_dispatched
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Close the queue and count what was left in it
fn discard_pending<T>(receiver: &mut mpsc::Receiver<T>) -> u64 {
    receiver.close();
    let mut discarded = 0;
    while receiver.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

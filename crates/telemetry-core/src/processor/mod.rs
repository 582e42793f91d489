//! Concurrent stream processor
//!
//! Feeds samples from many producers through per-signal rolling averages and
//! z-score detectors. Samples are handed to a background worker through a
//! bounded queue; when the queue is full the producer applies the sample
//! inline instead, so no sample is ever dropped and producers never wait for
//! queue space.
//!
//! The two admission paths do not preserve arrival order relative to each
//! other: a sample applied inline may reach the windows before an earlier
//! sample still waiting in the queue.

mod signal;
mod sink;
mod worker;


pub use sink::{AnomalySink, NoopNotifier, NotifySink};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::{DEFAULT_WINDOW_SIZE, DEFAULT_ZSCORE_THRESHOLD};
use crate::health::HealthRegistry;
use crate::models::{signals, AnalyticsSnapshot, AnomalyEvent, Sample};
use signal::SignalTracker;
use worker::{DispatchWorker, Pipeline, SampleWorker};

/// Default capacity of the sample and anomaly queues
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Configuration for the stream processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Values kept per signal window
    pub window_size: usize,
    /// Absolute z-score above which a value is anomalous
    pub zscore_threshold: f64,
    /// Capacity of the sample queue
    pub sample_buffer_size: usize,
    /// Capacity of the anomaly event queue
    pub anomaly_buffer_size: usize,
    /// Names of the tracked signals
    pub signals: Vec<String>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            sample_buffer_size: DEFAULT_BUFFER_SIZE,
            anomaly_buffer_size: DEFAULT_BUFFER_SIZE,
            signals: vec![signals::CPU.to_string(), signals::RPS.to_string()],
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ProcessorError> {
        if self.window_size == 0 {
            return Err(ProcessorError::InvalidConfig(
                "window_size must be positive".to_string(),
            ));
        }
        if !(self.zscore_threshold.is_finite() && self.zscore_threshold > 0.0) {
            return Err(ProcessorError::InvalidConfig(format!(
                "zscore_threshold must be a positive number, got {}",
                self.zscore_threshold
            )));
        }
        if self.sample_buffer_size == 0 || self.anomaly_buffer_size == 0 {
            return Err(ProcessorError::InvalidConfig(
                "queue buffer sizes must be positive".to_string(),
            ));
        }
        if self.signals.is_empty() {
            return Err(ProcessorError::InvalidConfig(
                "at least one signal must be tracked".to_string(),
            ));
        }
        for (i, name) in self.signals.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(ProcessorError::InvalidConfig(
                    "signal names must not be empty".to_string(),
                ));
            }
            if self.signals[..i].contains(name) {
                return Err(ProcessorError::InvalidConfig(format!(
                    "signal {name:?} is listed more than once"
                )));
            }
        }
        Ok(())
    }
}

/// Errors surfaced by the stream processor
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("invalid processor configuration: {0}")]
    InvalidConfig(String),
    #[error("stream processor already started")]
    AlreadyStarted,
    #[error("stream processor must be started inside a tokio runtime")]
    NoRuntime,
    #[error("stream processor is {0} and no longer accepts samples")]
    NotAccepting(ProcessorState),
}

/// Lifecycle of a stream processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProcessorState {
    /// Workers not yet started; samples are accepted and queued
    Created = 0,
    Running = 1,
    /// Stop signalled; samples are rejected
    Stopping = 2,
    Stopped = 3,
}

impl ProcessorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessorState::Created,
            1 => ProcessorState::Running,
            2 => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }

    pub fn accepts_samples(&self) -> bool {
        matches!(self, ProcessorState::Created | ProcessorState::Running)
    }
}

impl std::fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorState::Created => write!(f, "created"),
            ProcessorState::Running => write!(f, "running"),
            ProcessorState::Stopping => write!(f, "stopping"),
            ProcessorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Path a sample took into the aggregators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Admission {
    /// Handed to the background worker
    Queued,
    /// Queue was full; applied by the caller
    Inline,
}

/// Operational counters of a stream processor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    pub total_samples: u64,
    pub queued: u64,
    pub inline: u64,
    pub applied: u64,
    pub anomaly_events_dropped: u64,
    pub anomaly_events_dispatched: u64,
    pub sink_failures: u64,
    pub discarded_on_shutdown: u64,
}

/// Receivers and sinks held until the workers are spawned
struct PendingWorkers {
    sample_rx: mpsc::Receiver<Sample>,
    anomaly_rx: mpsc::Receiver<AnomalyEvent>,
    sinks: Vec<Arc<dyn AnomalySink>>,
}

/// Concurrency-safe streaming analytics engine
pub struct StreamProcessor {
    config: ProcessorConfig,
    pipeline: Arc<Pipeline>,
    sample_tx: mpsc::Sender<Sample>,
    latest: RwLock<Option<Sample>>,
    total_samples: AtomicU64,
    queued: AtomicU64,
    inline: AtomicU64,
    state: AtomicU8,
    pending: Mutex<Option<PendingWorkers>>,
    handles: Mutex<Vec<JoinHandle<u64>>>,
    shutdown_tx: broadcast::Sender<()>,
    health: Option<HealthRegistry>,
}

impl StreamProcessor {
    /// Create a processor with default collaborators
    pub fn new(config: ProcessorConfig) -> Result<Self, ProcessorError> {
        StreamProcessorBuilder::new().config(config).build()
    }

    pub fn builder() -> StreamProcessorBuilder {
        StreamProcessorBuilder::new()
    }

    /// Spawn the sample and dispatch workers on the current tokio runtime
    pub fn start(&self) -> Result<(), ProcessorError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ProcessorError::NoRuntime)?;

        // Subscribed and locked before the transition so a concurrent stop()
        // always finds both handles and reaches both workers.
        let sample_shutdown = self.shutdown_tx.subscribe();
        let dispatch_shutdown = self.shutdown_tx.subscribe();
        let mut handles = lock(&self.handles);

        self.transition(ProcessorState::Created, ProcessorState::Running)
            .map_err(|state| match state {
                ProcessorState::Running => ProcessorError::AlreadyStarted,
                other => ProcessorError::NotAccepting(other),
            })?;

        let Some(pending) = lock(&self.pending).take() else {
            return Err(ProcessorError::AlreadyStarted);
        };

        let sample_worker = SampleWorker::new(
            Arc::clone(&self.pipeline),
            pending.sample_rx,
            self.health.clone(),
        );
        let dispatch_worker = DispatchWorker::new(
            Arc::clone(&self.pipeline),
            pending.anomaly_rx,
            pending.sinks,
            self.health.clone(),
        );

        handles.push(runtime.spawn(sample_worker.run(sample_shutdown)));
        handles.push(runtime.spawn(dispatch_worker.run(dispatch_shutdown)));
        drop(handles);

        info!(
            signals = ?self.config.signals,
            window_size = self.config.window_size,
            zscore_threshold = self.config.zscore_threshold,
            buffer_size = self.config.sample_buffer_size,
            "Stream processor started"
        );
        Ok(())
    }

    /// Accept one sample
    ///
    /// Never blocks on the queue: when it is full the sample is applied
    /// inline by the caller. Rejected once the processor is stopping.
    pub fn process_sample(&self, sample: Sample) -> Result<Admission, ProcessorError> {
        let state = self.state();
        if !state.accepts_samples() {
            return Err(ProcessorError::NotAccepting(state));
        }

        *self
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(sample.clone());
        self.total_samples.fetch_add(1, Ordering::Relaxed);

        match self.sample_tx.try_send(sample) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Queued)
            }
            Err(mpsc::error::TrySendError::Full(sample))
            | Err(mpsc::error::TrySendError::Closed(sample)) => {
                self.pipeline.apply(&sample);
                let inline = self.inline.fetch_add(1, Ordering::Relaxed) + 1;
                if inline.is_power_of_two() {
                    debug!(
                        event = "sample_fallback",
                        inline_total = inline,
                        "Sample queue full, applying inline"
                    );
                }
                Ok(Admission::Inline)
            }
        }
    }

    /// Latest values, rolling averages and z-scores across tracked signals
    pub fn analytics(&self) -> AnalyticsSnapshot {
        let latest = self.latest_sample();
        let total_samples = self.total_samples();

        let signals = self
            .pipeline
            .signals
            .iter()
            .map(|tracker| {
                let current = latest
                    .as_ref()
                    .and_then(|sample| sample.value(tracker.name()));
                (tracker.name().to_string(), tracker.analytics(current))
            })
            .collect();

        AnalyticsSnapshot {
            signals,
            total_samples,
            window_size: self.config.window_size,
            threshold: self.config.zscore_threshold,
            last_sample_at: latest.map(|sample| sample.timestamp()),
            last_updated: Utc::now(),
        }
    }

    /// Anomaly count per tracked signal
    pub fn anomaly_counts(&self) -> BTreeMap<String, u64> {
        self.pipeline
            .signals
            .iter()
            .map(|tracker| (tracker.name().to_string(), tracker.anomaly_count()))
            .collect()
    }

    /// Anomaly count for one signal, `None` if the signal is not tracked
    pub fn anomaly_count(&self, signal: &str) -> Option<u64> {
        self.pipeline.signal(signal).map(|tracker| tracker.anomaly_count())
    }

    /// Samples accepted so far, across both admission paths
    pub fn total_samples(&self) -> u64 {
        self.total_samples.load(Ordering::Relaxed)
    }

    pub fn latest_sample(&self) -> Option<Sample> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rolling window contents of one signal, oldest first
    pub fn window(&self, signal: &str) -> Option<Vec<f64>> {
        self.pipeline.signal(signal).map(|tracker| tracker.window())
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            total_samples: self.total_samples(),
            queued: self.queued.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
            applied: self.pipeline.applied.load(Ordering::Relaxed),
            anomaly_events_dropped: self.pipeline.events_dropped.load(Ordering::Relaxed),
            anomaly_events_dispatched: self
                .pipeline
                .events_dispatched
                .load(Ordering::Relaxed),
            sink_failures: self.pipeline.sink_failures.load(Ordering::Relaxed),
            discarded_on_shutdown: self
                .pipeline
                .discarded_on_shutdown
                .load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessorState {
        ProcessorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Signal both workers to exit and wait for them
    ///
    /// Samples and events still queued are discarded and counted in
    /// [`ProcessorStats::discarded_on_shutdown`]. Calling `stop` again, or
    /// while another call is in progress, returns immediately.
    pub async fn stop(&self) {
        let previous = match self.transition(ProcessorState::Running, ProcessorState::Stopping) {
            Ok(previous) => previous,
            Err(ProcessorState::Created) => {
                if self
                    .transition(ProcessorState::Created, ProcessorState::Stopped)
                    .is_ok()
                {
                    self.discard_unstarted();
                }
                return;
            }
            Err(_) => return,
        };
        debug!(from = %previous, "Stopping stream processor");

        // No receivers only means the workers already exited
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        let mut discarded = 0;
        for handle in handles {
            match handle.await {
                Ok(count) => discarded += count,
                Err(e) => warn!(error = %e, "Stream processor worker terminated abnormally"),
            }
        }

        self.pipeline
            .discarded_on_shutdown
            .fetch_add(discarded, Ordering::Relaxed);
        self.state
            .store(ProcessorState::Stopped as u8, Ordering::Release);

        info!(
            total_samples = self.total_samples(),
            discarded = discarded,
            "Stream processor stopped"
        );
    }

    fn discard_unstarted(&self) {
        let Some(mut pending) = lock(&self.pending).take() else {
            return;
        };

        pending.sample_rx.close();
        let mut discarded = 0;
        while pending.sample_rx.try_recv().is_ok() {
            discarded += 1;
        }

        self.pipeline
            .discarded_on_shutdown
            .fetch_add(discarded, Ordering::Relaxed);
        if discarded > 0 {
            warn!(
                discarded = discarded,
                "Stream processor stopped before start, discarding queued samples"
            );
        }
    }

    fn transition(
        &self,
        from: ProcessorState,
        to: ProcessorState,
    ) -> Result<ProcessorState, ProcessorState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(ProcessorState::from_u8)
            .map_err(ProcessorState::from_u8)
    }
}

/// Builder for a [`StreamProcessor`]
pub struct StreamProcessorBuilder {
    config: ProcessorConfig,
    notifier: Arc<dyn NotifySink>,
    sinks: Vec<Arc<dyn AnomalySink>>,
    health: Option<HealthRegistry>,
}

impl StreamProcessorBuilder {
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
            notifier: Arc::new(NoopNotifier),
            sinks: Vec::new(),
            health: None,
        }
    }

    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn zscore_threshold(mut self, threshold: f64) -> Self {
        self.config.zscore_threshold = threshold;
        self
    }

    /// Set the capacity of both queues
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.sample_buffer_size = size;
        self.config.anomaly_buffer_size = size;
        self
    }

    pub fn signals<I, S>(mut self, signals: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.signals = signals.into_iter().map(Into::into).collect();
        self
    }

    /// Synchronous per-anomaly notifier
    pub fn notifier(mut self, notifier: Arc<dyn NotifySink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Add a consumer for the anomaly event stream
    pub fn sink(mut self, sink: Arc<dyn AnomalySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Report worker status into `health`
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<StreamProcessor, ProcessorError> {
        self.config.validate()?;

        let (sample_tx, sample_rx) = mpsc::channel(self.config.sample_buffer_size);
        let (anomaly_tx, anomaly_rx) = mpsc::channel(self.config.anomaly_buffer_size);
        let (shutdown_tx, _) = broadcast::channel(1);

        let trackers = self
            .config
            .signals
            .iter()
            .map(|name| {
                SignalTracker::new(
                    name.clone(),
                    self.config.window_size,
                    self.config.zscore_threshold,
                )
            })
            .collect();

        Ok(StreamProcessor {
            pipeline: Arc::new(Pipeline::new(trackers, self.notifier, anomaly_tx)),
            sample_tx,
            latest: RwLock::new(None),
            total_samples: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            inline: AtomicU64::new(0),
            state: AtomicU8::new(ProcessorState::Created as u8),
            pending: Mutex::new(Some(PendingWorkers {
                sample_rx,
                anomaly_rx,
                sinks: self.sinks,
            })),
            handles: Mutex::new(Vec::new()),
            shutdown_tx,
            health: self.health,
            config: self.config,
        })
    }
}

impl Default for StreamProcessorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

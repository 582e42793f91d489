//! Per-signal aggregator state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::analytics::{RollingAverage, Verdict, WindowStats, ZScoreDetector};
use crate::models::SignalAnalytics;

/// Result of feeding one value into a signal's aggregators
#[derive(Debug, Clone, Copy)]
pub(crate) struct Update {
    pub verdict: Verdict,
    /// Window statistics the value was scored against
    pub baseline: WindowStats,
}

struct Aggregators {
    rolling: RollingAverage,
    detector: ZScoreDetector,
}

/// Rolling average and detector for one signal behind a single lock
pub(crate) struct SignalTracker {
    name: String,
    aggregators: Mutex<Aggregators>,
    anomaly_count: AtomicU64,
}

impl SignalTracker {
    pub(crate) fn new(name: impl Into<String>, window_size: usize, threshold: f64) -> Self {
        Self {
            name: name.into(),
            aggregators: Mutex::new(Aggregators {
                rolling: RollingAverage::new(window_size),
                detector: ZScoreDetector::new(window_size, threshold),
            }),
            anomaly_count: AtomicU64::new(0),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Feed `value` into both aggregators as one atomic update
    pub(crate) fn update(&self, value: f64) -> Update {
        let mut aggregators = self.lock();
        aggregators.rolling.add(value);

        let baseline = aggregators.detector.stats();
        let verdict = aggregators.detector.add(value);
        drop(aggregators);

        if verdict.is_anomaly {
            self.anomaly_count.fetch_add(1, Ordering::Relaxed);
        }

        Update { verdict, baseline }
    }

    pub(crate) fn anomaly_count(&self) -> u64 {
        self.anomaly_count.load(Ordering::Relaxed)
    }

    /// Read-only view against the current windows
    pub(crate) fn analytics(&self, current: Option<f64>) -> SignalAnalytics {
        let aggregators = self.lock();
        let verdict = current
            .map(|value| aggregators.detector.is_anomaly(value))
            .unwrap_or(Verdict {
                is_anomaly: false,
                z_score: 0.0,
            });

        SignalAnalytics {
            current,
            average: aggregators.rolling.average(),
            predicted: aggregators.rolling.prediction(),
            z_score: verdict.z_score,
            anomaly: verdict.is_anomaly,
            anomaly_count: self.anomaly_count(),
        }
    }

    /// Snapshot of the rolling window, oldest first
    pub(crate) fn window(&self) -> Vec<f64> {
        self.lock().rolling.values()
    }

    // Window pushes are single operations, so a poisoned lock still guards
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, Aggregators> {
        self.aggregators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

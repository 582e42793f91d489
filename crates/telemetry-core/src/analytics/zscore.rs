//! Z-score anomaly detection
//!
//! Scores each incoming value against the window as it exists *before* the
//! value is admitted, so a value never skews its own verdict.

use serde::{Deserialize, Serialize};

use super::window::SlidingWindow;
use super::{DEFAULT_WINDOW_SIZE, DEFAULT_ZSCORE_THRESHOLD};

/// Minimum number of values in the window before a z-score is computed
const MIN_SAMPLES_FOR_SCORING: usize = 2;

/// Outcome of scoring one value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_anomaly: bool,
    pub z_score: f64,
}

impl Verdict {
    fn neutral() -> Self {
        Self {
            is_anomaly: false,
            z_score: 0.0,
        }
    }
}

/// Mean and population standard deviation of a window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Sliding-window z-score detector
///
/// A window with fewer than two values, or with zero spread, yields a z-score
/// of `0.0` and never flags. A constant window therefore accepts any value,
/// however far it is from the constant mean.
#[derive(Debug, Clone)]
pub struct ZScoreDetector {
    window: SlidingWindow,
    threshold: f64,
}

impl ZScoreDetector {
    /// Create a detector over the last `window_size` values.
    ///
    /// A zero window size or a non-positive threshold falls back to the defaults.
    pub fn new(window_size: usize, threshold: f64) -> Self {
        let threshold = if threshold.is_finite() && threshold > 0.0 {
            threshold
        } else {
            DEFAULT_ZSCORE_THRESHOLD
        };

        Self {
            window: SlidingWindow::new(window_size),
            threshold,
        }
    }

    /// Score `value` against the current window, then admit it
    pub fn add(&mut self, value: f64) -> Verdict {
        let verdict = self.score(value);
        self.window.push(value);
        verdict
    }

    /// Score `value` without admitting it
    pub fn is_anomaly(&self, value: f64) -> Verdict {
        self.score(value)
    }

    /// Mean and standard deviation of the current window
    pub fn stats(&self) -> WindowStats {
        let mean = self.window.mean();
        WindowStats {
            mean,
            std_dev: self.window.population_std_dev(mean),
        }
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// Copy of the window contents, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.window.to_vec()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn score(&self, value: f64) -> Verdict {
        if self.window.len() < MIN_SAMPLES_FOR_SCORING {
            return Verdict::neutral();
        }

        let stats = self.stats();
        if stats.std_dev == 0.0 {
            return Verdict::neutral();
        }

        let z_score = (value - stats.mean) / stats.std_dev;
        Verdict {
            is_anomaly: z_score.abs() > self.threshold,
            z_score,
        }
    }
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE, DEFAULT_ZSCORE_THRESHOLD)
    }
}

//! Fixed-capacity FIFO window shared by the rolling average and the
//! z-score detector.

use std::collections::VecDeque;

use super::DEFAULT_WINDOW_SIZE;

/// Bounded window of recent values, oldest first
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl SlidingWindow {
    /// Create an empty window. A capacity of zero falls back to the default.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_WINDOW_SIZE
        } else {
            capacity
        };

        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest one when the window is full
    pub(crate) fn push(&mut self, value: f64) {
        while self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Arithmetic mean, `0.0` for an empty window
    pub(crate) fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let sum: f64 = self.values.iter().sum();
        sum / self.values.len() as f64
    }

    /// Population standard deviation around `mean`.
    ///
    /// Windows holding fewer than two values have no spread and report `0.0`.
    pub(crate) fn population_std_dev(&self, mean: f64) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }

        let sum_squares: f64 = self.values.iter().map(|v| (v - mean).powi(2)).sum();
        (sum_squares / self.values.len() as f64).sqrt()
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the window contents in insertion order
    pub(crate) fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }
}

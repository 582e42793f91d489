//! Rolling average over a sliding window
//!
//! The rolling average doubles as a smoothed prediction of the next value.

use super::window::SlidingWindow;

/// Sliding-window arithmetic mean
#[derive(Debug, Clone)]
pub struct RollingAverage {
    window: SlidingWindow,
}

impl RollingAverage {
    /// Create a rolling average over the last `window_size` values
    ///
    /// A window size of zero falls back to [`DEFAULT_WINDOW_SIZE`](super::DEFAULT_WINDOW_SIZE).
    pub fn new(window_size: usize) -> Self {
        Self {
            window: SlidingWindow::new(window_size),
        }
    }

    /// Add a value and return the average of the resulting window
    pub fn add(&mut self, value: f64) -> f64 {
        self.window.push(value);
        self.window.mean()
    }

    /// Current average, `0.0` while the window is empty
    pub fn average(&self) -> f64 {
        self.window.mean()
    }

    /// Smoothed prediction of the next value
    pub fn prediction(&self) -> f64 {
        self.average()
    }

    /// Copy of the window contents, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.window.to_vec()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }

    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    /// Drop every value; the capacity is kept
    pub fn reset(&mut self) {
        self.window.clear();
    }
}

impl Default for RollingAverage {
    fn default() -> Self {
        Self::new(super::DEFAULT_WINDOW_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_average_is_zero() {
        let avg = RollingAverage::new(5);
        assert_eq!(avg.average(), 0.0);
        assert_eq!(avg.count(), 0);
        assert!(avg.values().is_empty());
    }

    #[test]
    fn test_add_returns_running_average() {
        let mut avg = RollingAverage::new(10);
        assert_eq!(avg.add(2.0), 2.0);
        assert_eq!(avg.add(4.0), 3.0);
        assert_eq!(avg.add(6.0), 4.0);
    }

    #[test]
    fn test_window_eviction() {
        let mut avg = RollingAverage::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            avg.add(v);
        }

        assert_eq!(avg.values(), vec![2.0, 3.0, 4.0]);
        assert_eq!(avg.average(), 3.0);
        assert_eq!(avg.prediction(), 3.0);
    }

    #[test]
    fn test_count_is_bounded_by_window() {
        let capacity = 7;
        for k in 0..20 {
            let mut avg = RollingAverage::new(capacity);
            let inserted: Vec<f64> = (0..k).map(|i| i as f64 * 1.5).collect();
            for v in &inserted {
                avg.add(*v);
            }

            let expected_len = k.min(capacity);
            assert_eq!(avg.count(), expected_len);
            assert_eq!(avg.values(), inserted[k - expected_len..].to_vec());
        }
    }

    #[test]
    fn test_values_returns_a_copy() {
        let mut avg = RollingAverage::new(3);
        avg.add(1.0);
        avg.add(2.0);

        let mut snapshot = avg.values();
        snapshot[0] = 100.0;
        snapshot.push(7.0);

        assert_eq!(avg.values(), vec![1.0, 2.0]);
        assert_eq!(avg.average(), 1.5);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut avg = RollingAverage::new(4);
        for v in [5.0, 6.0, 7.0] {
            avg.add(v);
        }

        avg.reset();
        assert_eq!(avg.count(), 0);
        assert_eq!(avg.average(), 0.0);
        assert_eq!(avg.window_size(), 4);
    }

    #[test]
    fn test_zero_window_uses_default() {
        let avg = RollingAverage::new(0);
        assert_eq!(avg.window_size(), super::super::DEFAULT_WINDOW_SIZE);
    }
}

//! Streaming statistics over fixed-capacity windows
//!
//! This module provides:
//! - Rolling averages used as smoothed next-value predictions
//! - Z-score anomaly detection scored before insertion

mod rolling;
mod window;
mod zscore;

pub use rolling::RollingAverage;
pub use zscore::{Verdict, WindowStats, ZScoreDetector};

/// Default number of values kept per window
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// Default absolute z-score above which a value is anomalous
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 2.0;

//! Running statistics over the EDA stream
//!
//! Mean and standard deviation are updated one sample at a time. The squared
//! deviation uses the mean from *before* the update, as the legacy running
//! average did. Accumulators are `f64` so the estimate stays stable over
//! arbitrarily long sessions.

use serde::{Deserialize, Serialize};

/// Incremental mean / standard deviation estimator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStatistics {
    mean: f64,
    sum_squared_deviation: f64,
    count: u64,
}

impl RunningStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the estimate.
    ///
    /// A value of exactly zero is the sensor's disconnect sentinel and is
    /// ignored, so taking the sensor off does not drag the average down.
    pub fn update(&mut self, value: f32) {
        if value == 0.0 {
            return;
        }
        let value = value as f64;
        let count_before = self.count as f64;

        self.sum_squared_deviation += (value - self.mean).powi(2);
        self.mean = (self.mean * count_before + value) / (count_before + 1.0);
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_squared_deviation / self.count as f64).sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Normalize a value against the current estimate
    pub fn z_score(&self, value: f32) -> Option<f64> {
        let stddev = self.stddev();
        if stddev > 0.0 {
            Some((value as f64 - self.mean) / stddev)
        } else {
            None
        }
    }
}

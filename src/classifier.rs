//! Arousal classification
//!
//! Each signal is quantized into the number of 10% steps it sits away from
//! its baseline. The two levels are summed without weighting or per-signal
//! caps, and the total is mapped onto a [`Band`].
//!
//! Deviations are taken as absolute values, so a signal below baseline
//! contributes the same shift as one equally far above it.

use crate::config::Baseline;
use crate::types::{Band, Classification};
use log::warn;

/// Percentage change needed to move a signal up one level
pub const LEVEL_STEP_PCT: f32 = 10.0;

/// Number of whole level steps `value` deviates from `base`.
///
/// `base` must be non-zero; [`Baseline`] guarantees this at construction.
pub fn shift_level(value: f32, base: f32) -> u32 {
    let pct = ((value - base) / base).abs() * 100.0;
    if !pct.is_finite() {
        warn!("Non-finite deviation for value {} against base {}", value, base);
    }
    // Float-to-int casts saturate: NaN maps to 0, infinity to u32::MAX
    (pct / LEVEL_STEP_PCT).floor() as u32
}

/// Combine the latest EDA and HR values into one classification
pub fn classify(latest_eda: f32, latest_hr: f32, baseline: &Baseline) -> Classification {
    let eda_level = shift_level(latest_eda, baseline.base_eda());
    let hr_level = shift_level(latest_hr, baseline.base_hr());
    let total_shift = eda_level.saturating_add(hr_level);

    Classification {
        band: Band::from_shift(total_shift),
        total_shift,
        eda_level,
        hr_level,
    }
}

/// Classifier bound to a fixed personal baseline
#[derive(Debug, Clone, Copy, Default)]
pub struct ArousalClassifier {
    baseline: Baseline,
}

impl ArousalClassifier {
    pub fn new(baseline: Baseline) -> Self {
        Self { baseline }
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn classify(&self, latest_eda: f32, latest_hr: f32) -> Classification {
        classify(latest_eda, latest_hr, &self.baseline)
    }
}

//! Pipeline configuration
//!
//! Configuration is a plain serde value. Loading it from disk is left to the
//! host; `from_json` is provided for hosts and the CLI that keep it as JSON.

use crate::error::GlimError;
use serde::{Deserialize, Serialize};

/// Default resting EDA reference (microsiemens)
pub const DEFAULT_BASE_EDA: f32 = 1.5;

/// Default resting heart-rate reference (bpm)
pub const DEFAULT_BASE_HR: f32 = 80.0;

/// Default number of samples per upload batch
pub const DEFAULT_BATCH_CAPACITY: usize = 32;

/// Default cap on un-delimited bytes held by the frame decoder
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024;

/// Field index of the EDA reading in the sensor CSV line
pub const DEFAULT_EDA_FIELD_INDEX: usize = 6;

/// Minimum number of CSV fields in a valid sensor line
pub const DEFAULT_MIN_FIELDS: usize = 7;

/// Default number of points retained for the waveform display
pub const DEFAULT_DISPLAY_WINDOW: usize = 640;

/// Default number of batches that may wait for the upload collaborator
pub const DEFAULT_UPLOAD_QUEUE_DEPTH: usize = 4;

/// Annotations are stamped this far in the past to line up with the
/// signal shown at the centre of the display
pub const DEFAULT_ANNOTATION_OFFSET_MS: i64 = 2000;

/// Fixed personal reference values, supplied by external calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    base_eda: f32,
    base_hr: f32,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            base_eda: DEFAULT_BASE_EDA,
            base_hr: DEFAULT_BASE_HR,
        }
    }
}

impl Baseline {
    /// Create a baseline, rejecting zero or non-finite references
    pub fn new(base_eda: f32, base_hr: f32) -> Result<Self, GlimError> {
        let baseline = Self { base_eda, base_hr };
        baseline.validate()?;
        Ok(baseline)
    }

    pub fn base_eda(&self) -> f32 {
        self.base_eda
    }

    pub fn base_hr(&self) -> f32 {
        self.base_hr
    }

    /// A zero baseline would divide by zero on every classification
    pub fn validate(&self) -> Result<(), GlimError> {
        if self.base_eda == 0.0 || !self.base_eda.is_finite() {
            return Err(GlimError::InvalidConfig(format!(
                "base_eda must be finite and non-zero, got {}",
                self.base_eda
            )));
        }
        if self.base_hr == 0.0 || !self.base_hr.is_finite() {
            return Err(GlimError::InvalidConfig(format!(
                "base_hr must be finite and non-zero, got {}",
                self.base_hr
            )));
        }
        Ok(())
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub baseline: Baseline,
    /// Samples per upload batch
    pub batch_capacity: usize,
    /// Cap on un-delimited bytes before the decoder reports FrameTooLarge
    pub max_frame_bytes: usize,
    /// Index of the EDA field in each CSV line
    pub eda_field_index: usize,
    /// Minimum field count for a valid CSV line
    pub min_fields: usize,
    /// Points retained in the tonic/phasic display window
    pub display_window: usize,
    /// Batches allowed to queue for the upload collaborator before dropping
    pub upload_queue_depth: usize,
    /// Offset subtracted from annotation timestamps
    pub annotation_offset_ms: i64,
    /// Flag HR as stale after this many milliseconds without a packet
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hr_stale_after_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline: Baseline::default(),
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            eda_field_index: DEFAULT_EDA_FIELD_INDEX,
            min_fields: DEFAULT_MIN_FIELDS,
            display_window: DEFAULT_DISPLAY_WINDOW,
            upload_queue_depth: DEFAULT_UPLOAD_QUEUE_DEPTH,
            annotation_offset_ms: DEFAULT_ANNOTATION_OFFSET_MS,
            hr_stale_after_ms: None,
        }
    }
}

impl PipelineConfig {
    /// Create a default configuration around the given baseline
    pub fn with_baseline(baseline: Baseline) -> Self {
        Self {
            baseline,
            ..Default::default()
        }
    }

    /// Check every value the pipeline depends on
    pub fn validate(&self) -> Result<(), GlimError> {
        self.baseline.validate()?;

        if self.batch_capacity == 0 {
            return Err(GlimError::InvalidConfig(
                "batch_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_frame_bytes == 0 {
            return Err(GlimError::InvalidConfig(
                "max_frame_bytes must be at least 1".to_string(),
            ));
        }
        if self.min_fields <= self.eda_field_index {
            return Err(GlimError::InvalidConfig(format!(
                "min_fields ({}) must exceed eda_field_index ({})",
                self.min_fields, self.eda_field_index
            )));
        }
        if self.display_window == 0 {
            return Err(GlimError::InvalidConfig(
                "display_window must be at least 1".to_string(),
            ));
        }
        if self.upload_queue_depth == 0 {
            return Err(GlimError::InvalidConfig(
                "upload_queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, GlimError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_capacity, 32);
        assert_eq!(config.eda_field_index, 6);
        assert_eq!(config.baseline.base_eda(), 1.5);
        assert_eq!(config.baseline.base_hr(), 80.0);
    }

    #[test]
    fn test_zero_baseline_rejected() {
        assert!(matches!(
            Baseline::new(0.0, 80.0),
            Err(GlimError::InvalidConfig(_))
        ));
        assert!(matches!(
            Baseline::new(1.5, 0.0),
            Err(GlimError::InvalidConfig(_))
        ));
        assert!(Baseline::new(f32::NAN, 80.0).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json(
            r#"{"baseline": {"base_eda": 2.0, "base_hr": 65.0}, "batch_capacity": 8}"#,
        )
        .unwrap();
        assert_eq!(config.batch_capacity, 8);
        assert_eq!(config.baseline.base_hr(), 65.0);
        assert_eq!(config.display_window, DEFAULT_DISPLAY_WINDOW);
        assert_eq!(config.hr_stale_after_ms, None);
    }

    #[test]
    fn test_zero_baseline_json_rejected() {
        let result =
            PipelineConfig::from_json(r#"{"baseline": {"base_eda": 0.0, "base_hr": 80.0}}"#);
        assert!(matches!(result, Err(GlimError::InvalidConfig(_))));
    }

    #[test]
    fn test_field_index_must_fit() {
        let config = PipelineConfig {
            min_fields: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = PipelineConfig {
            hr_stale_after_ms: Some(5000),
            ..Default::default()
        };
        let json = config.to_json().unwrap();
        let loaded = PipelineConfig::from_json(&json).unwrap();
        assert_eq!(loaded, config);
    }
}

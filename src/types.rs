//! Core types for the Glim Flux pipeline
//!
//! This module defines the values that flow between stages: decoded EDA
//! frames, heart-rate samples, tonic/phasic pairs, and the arousal reading
//! handed to the display collaborator.

use serde::{Deserialize, Serialize};

/// One decoded EDA reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdaFrame {
    /// Wall-clock milliseconds at decode time
    pub timestamp_ms: i64,
    /// Parsed EDA value (microsiemens)
    pub raw_value: f32,
    /// Field text exactly as received, used for upload batches
    pub raw_text: String,
}

/// One validated heart-rate packet from the HR protocol collaborator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrSample {
    /// Heart rate (beats/min)
    pub heart_rate: f32,
    /// Instantaneous speed reported by the strap
    pub instant_speed: f32,
}

impl HrSample {
    pub fn new(heart_rate: f32, instant_speed: f32) -> Self {
        Self {
            heart_rate,
            instant_speed,
        }
    }
}

/// Tonic/phasic split of a single EDA sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Decomposition {
    /// Slow-moving baseline level
    pub tonic: f32,
    /// Fast residual (raw - tonic)
    pub phasic: f32,
}

/// Ordinal arousal band derived from the total shift level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    Rest,
    Active,
    HyperActive,
    Escalating,
    Saturated,
}

impl Band {
    /// Map a total shift level onto its band.
    ///
    /// `{0,1}` Rest, `{2,3}` Active, `{4,5}` HyperActive, `{6,7}` Escalating,
    /// anything higher Saturated.
    pub fn from_shift(total_shift: u32) -> Self {
        match total_shift {
            0 | 1 => Band::Rest,
            2 | 3 => Band::Active,
            4 | 5 => Band::HyperActive,
            6 | 7 => Band::Escalating,
            _ => Band::Saturated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Rest => "rest",
            Band::Active => "active",
            Band::HyperActive => "hyper_active",
            Band::Escalating => "escalating",
            Band::Saturated => "saturated",
        }
    }
}

/// Heart-rate zone from absolute heart rate alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrZone {
    Rest,
    Active,
    HyperActive,
}

/// Upper bound (exclusive) of the resting heart-rate zone (bpm)
pub const HR_ZONE_ACTIVE_BPM: f32 = 90.0;

/// Lower bound (inclusive) of the hyper-active heart-rate zone (bpm)
pub const HR_ZONE_HYPER_BPM: f32 = 150.0;

impl HrZone {
    pub fn from_heart_rate(heart_rate: f32) -> Self {
        if heart_rate < HR_ZONE_ACTIVE_BPM {
            HrZone::Rest
        } else if heart_rate < HR_ZONE_HYPER_BPM {
            HrZone::Active
        } else {
            HrZone::HyperActive
        }
    }
}

/// Result of combining EDA and HR deviations from baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub band: Band,
    /// Sum of both per-signal levels
    pub total_shift: u32,
    /// Number of 10% steps EDA sits away from its baseline
    pub eda_level: u32,
    /// Number of 10% steps HR sits away from its baseline
    pub hr_level: u32,
}

/// Value object handed to the display collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArousalReading {
    pub band: Band,
    pub total_shift: u32,
    pub eda_level: u32,
    pub hr_level: u32,
    /// Latest EDA value (the EDA baseline until the first frame arrives)
    pub latest_eda: f32,
    /// Latest heart rate (the HR baseline until the first packet arrives)
    pub latest_hr: f32,
    pub hr_zone: HrZone,
    /// Set only when a staleness threshold is configured and exceeded
    pub hr_stale: bool,
    /// Latest tonic/phasic pair, if any EDA sample has been decomposed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<Decomposition>,
    /// Monotonic per-pipeline counter; a larger value reflects newer state
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        let expected = [
            (0, Band::Rest),
            (1, Band::Rest),
            (2, Band::Active),
            (3, Band::Active),
            (4, Band::HyperActive),
            (5, Band::HyperActive),
            (6, Band::Escalating),
            (7, Band::Escalating),
            (8, Band::Saturated),
            (42, Band::Saturated),
        ];
        for (shift, band) in expected {
            assert_eq!(Band::from_shift(shift), band, "shift {}", shift);
        }
    }

    #[test]
    fn test_band_ordering() {
        assert!(Band::Rest < Band::Active);
        assert!(Band::Escalating < Band::Saturated);
    }

    #[test]
    fn test_hr_zone() {
        assert_eq!(HrZone::from_heart_rate(72.0), HrZone::Rest);
        assert_eq!(HrZone::from_heart_rate(90.0), HrZone::Active);
        assert_eq!(HrZone::from_heart_rate(149.9), HrZone::Active);
        assert_eq!(HrZone::from_heart_rate(150.0), HrZone::HyperActive);
    }

    #[test]
    fn test_band_serialization() {
        let json = serde_json::to_string(&Band::HyperActive).unwrap();
        assert_eq!(json, "\"hyper_active\"");
        assert_eq!(Band::HyperActive.as_str(), "hyper_active");
    }
}

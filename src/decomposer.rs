//! Tonic/phasic decomposition of the EDA signal
//!
//! A first-order IIR low-pass filter tracks the slow tonic level; the phasic
//! component is whatever the raw sample adds on top of it. The filter runs
//! online with no look-ahead.

use crate::config::DEFAULT_DISPLAY_WINDOW;
use crate::types::Decomposition;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Smoothing constant of the tonic filter
pub const TONIC_ALPHA: f32 = 0.02;

/// Scale applied to sample-to-sample differences in the slope trace
pub const SLOPE_SCALE: f32 = 1000.0;

/// Filter state carried between samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DecompositionState {
    pub last_raw: f32,
    pub last_tonic: f32,
    pub last_phasic: f32,
    pub sample_count: u64,
}

/// Exponential-smoothing splitter, one instance per EDA stream
#[derive(Debug, Clone, Default)]
pub struct SignalDecomposer {
    state: DecompositionState,
}

impl SignalDecomposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split one raw sample.
    ///
    /// Zero readings are filtered like any other value; only the running
    /// statistics treat zero as a disconnect.
    pub fn decompose(&mut self, raw: f32) -> Decomposition {
        let tonic = if self.state.sample_count == 0 {
            raw
        } else {
            TONIC_ALPHA * self.state.last_raw + (1.0 - TONIC_ALPHA) * self.state.last_tonic
        };
        let phasic = raw - tonic;

        self.state = DecompositionState {
            last_raw: raw,
            last_tonic: tonic,
            last_phasic: phasic,
            sample_count: self.state.sample_count + 1,
        };

        Decomposition { tonic, phasic }
    }

    /// Forget all history; the next sample takes the first-sample branch
    pub fn reset(&mut self) {
        self.state = DecompositionState::default();
    }

    pub fn state(&self) -> &DecompositionState {
        &self.state
    }

    /// Most recent split, if any sample has been seen
    pub fn last(&self) -> Option<Decomposition> {
        (self.state.sample_count > 0).then_some(Decomposition {
            tonic: self.state.last_tonic,
            phasic: self.state.last_phasic,
        })
    }
}

/// One point of the waveform display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    pub raw: f32,
    pub tonic: f32,
    pub phasic: f32,
}

/// Bounded history of decomposed samples for display.
///
/// Holds at most `capacity` points; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct DecompositionWindow {
    points: VecDeque<TracePoint>,
    capacity: usize,
}

impl Default for DecompositionWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_WINDOW)
    }
}

impl DecompositionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, raw: f32, split: Decomposition) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(TracePoint {
            raw,
            tonic: split.tonic,
            phasic: split.phasic,
        });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &TracePoint> {
        self.points.iter()
    }

    /// Owned copy for handing to the display collaborator
    pub fn snapshot(&self) -> Vec<TracePoint> {
        self.points.iter().copied().collect()
    }
}

/// Scaled first difference of the non-zero EDA samples
#[derive(Debug, Clone, Default)]
pub struct SlopeTracker {
    last: f32,
}

impl SlopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` for the zero disconnect sentinel, which also leaves the
    /// reference value untouched.
    pub fn update(&mut self, value: f32) -> Option<f32> {
        if value == 0.0 {
            return None;
        }
        let slope = (value - self.last) * SLOPE_SCALE;
        self.last = value;
        Some(slope)
    }
}

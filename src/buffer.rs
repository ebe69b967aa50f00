//! Bounded sample batching for upload
//!
//! EDA samples accumulate in a fixed-capacity batch. When a sample arrives at
//! a full batch, the batch is swapped out as an independently owned
//! [`FrozenBatch`] and the live batch restarts with just that sample.

use crate::config::DEFAULT_BATCH_CAPACITY;
use crate::types::EdaFrame;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One buffered `(timestamp, value)` pair.
///
/// The value keeps the sensor's original text so uploads reproduce the
/// received digits exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSample {
    pub timestamp_ms: i64,
    pub value: String,
}

impl BatchSample {
    pub fn new(timestamp_ms: i64, value: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            value: value.into(),
        }
    }
}

impl From<&EdaFrame> for BatchSample {
    fn from(frame: &EdaFrame) -> Self {
        Self {
            timestamp_ms: frame.timestamp_ms,
            value: frame.raw_text.clone(),
        }
    }
}

/// Snapshot of a full batch, detached from the live buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenBatch {
    pub id: Uuid,
    pub samples: Vec<BatchSample>,
}

impl FrozenBatch {
    /// Wrap samples under a fresh batch id
    pub fn new(samples: Vec<BatchSample>) -> Self {
        Self {
            id: Uuid::new_v4(),
            samples,
        }
    }
}

/// Fixed-capacity batching buffer
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<BatchSample>,
    capacity: usize,
    batches_flushed: u64,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY)
    }
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            batches_flushed: 0,
        }
    }

    /// Append a sample, returning the previous batch if it was full
    pub fn push(&mut self, sample: BatchSample) -> Option<FrozenBatch> {
        let flushed = if self.samples.len() == self.capacity {
            let full = std::mem::replace(&mut self.samples, Vec::with_capacity(self.capacity));
            self.batches_flushed += 1;
            Some(FrozenBatch::new(full))
        } else {
            None
        };

        self.samples.push(sample);
        flushed
    }

    /// Live (not yet flushed) samples, oldest first
    pub fn live(&self) -> &[BatchSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    /// Detach whatever is buffered, e.g. at shutdown
    pub fn drain(&mut self) -> Option<FrozenBatch> {
        if self.samples.is_empty() {
            return None;
        }
        Some(FrozenBatch::new(std::mem::take(&mut self.samples)))
    }
}

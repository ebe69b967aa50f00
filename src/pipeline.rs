//! Pipeline orchestration
//!
//! This module provides the public API for Glim Flux. It ties the EDA and HR
//! paths together and hands results to the display and upload collaborators:
//!
//! 1. FrameDecoder - Split raw EDA bytes into frames
//! 2. RunningStatistics / SignalDecomposer - Track the EDA signal
//! 3. SampleBuffer - Batch samples for upload
//! 4. HrDispatcher - Track the latest heart rate
//! 5. ArousalClassifier - Map both signals onto a band
//!
//! All EDA state sits behind one lock so readers never see a half-updated
//! tonic/phasic pair. Display and upload hand-offs happen after the lock is
//! released.

use crate::buffer::{BatchSample, FrozenBatch, SampleBuffer};
use crate::classifier::ArousalClassifier;
use crate::config::PipelineConfig;
use crate::decoder::FrameDecoder;
use crate::decomposer::{DecompositionWindow, SignalDecomposer, SlopeTracker, TracePoint};
use crate::dispatcher::HrDispatcher;
use crate::error::GlimError;
use crate::stats::RunningStatistics;
use crate::types::{ArousalReading, Decomposition, HrSample, HrZone};
use crate::upload::{UploadDispatcher, UploadMetricsSnapshot, UploadPayload, UploadSink};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// The display collaborator.
///
/// EDA and HR updates arrive from different threads. Deliveries are
/// serialized and ordered by [`ArousalReading::sequence`]: a reading older
/// than one already delivered is skipped, so a display never steps back in
/// time. `on_update` must not feed the pipeline it is registered with.
pub trait DisplaySink: Send + Sync + 'static {
    fn on_update(&self, reading: &ArousalReading);
}

impl<F> DisplaySink for F
where
    F: Fn(&ArousalReading) + Send + Sync + 'static,
{
    fn on_update(&self, reading: &ArousalReading) {
        self(reading)
    }
}

/// Outcome of one call to [`GlimPipeline::ingest_eda`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Frames decoded and processed
    pub frames: usize,
    /// Lines dropped as malformed or oversized
    pub failures: usize,
    /// Batches handed to the upload collaborator
    pub batches: usize,
    /// Reading after the last accepted frame
    pub reading: Option<ArousalReading>,
}

/// Point-in-time view of the EDA path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdaSummary {
    pub samples: u64,
    pub mean: f64,
    pub stddev: f64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    pub batches_flushed: u64,
    pub buffered_samples: usize,
    pub pending_bytes: usize,
    pub last_slope: Option<f32>,
}

struct EdaState {
    decoder: FrameDecoder,
    stats: RunningStatistics,
    decomposer: SignalDecomposer,
    window: DecompositionWindow,
    slope: SlopeTracker,
    last_slope: Option<f32>,
    buffer: SampleBuffer,
    latest_eda: f32,
}

/// Two-source arousal pipeline
pub struct GlimPipeline {
    config: PipelineConfig,
    classifier: ArousalClassifier,
    eda: Mutex<EdaState>,
    hr: HrDispatcher,
    uploads: Mutex<Option<UploadDispatcher>>,
    displays: RwLock<Vec<Box<dyn DisplaySink>>>,
    next_sequence: AtomicU64,
    // Sequence of the last reading handed to the displays
    delivered: Mutex<u64>,
    instance_id: String,
}

impl GlimPipeline {
    /// Create a pipeline. Fails if the configuration is invalid, in
    /// particular if either baseline is zero.
    pub fn new(config: PipelineConfig) -> Result<Self, GlimError> {
        config.validate()?;

        let eda = EdaState {
            decoder: FrameDecoder::from_config(&config),
            stats: RunningStatistics::new(),
            decomposer: SignalDecomposer::new(),
            window: DecompositionWindow::new(config.display_window),
            slope: SlopeTracker::new(),
            last_slope: None,
            buffer: SampleBuffer::new(config.batch_capacity),
            latest_eda: config.baseline.base_eda(),
        };

        let instance_id = Uuid::new_v4().to_string();
        info!(
            "Pipeline {} ready: base EDA {}, base HR {}, batch {}",
            instance_id,
            config.baseline.base_eda(),
            config.baseline.base_hr(),
            config.batch_capacity
        );

        Ok(Self {
            classifier: ArousalClassifier::new(config.baseline),
            config,
            eda: Mutex::new(eda),
            hr: HrDispatcher::new(),
            uploads: Mutex::new(None),
            displays: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            delivered: Mutex::new(0),
            instance_id,
        })
    }

    /// Create a pipeline that hands batches to `sink` on a background thread
    pub fn with_upload_sink<S: UploadSink>(
        config: PipelineConfig,
        sink: S,
    ) -> Result<Self, GlimError> {
        let pipeline = Self::new(config)?;
        let dispatcher = UploadDispatcher::start(sink, pipeline.config.upload_queue_depth)?;
        *pipeline.uploads.lock() = Some(dispatcher);
        Ok(pipeline)
    }

    /// Register a display collaborator
    pub fn add_display<D: DisplaySink>(&self, display: D) {
        self.displays.write().push(Box::new(display));
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// HR fan-out point, for registering additional HR observers
    pub fn hr(&self) -> &HrDispatcher {
        &self.hr
    }

    /// Feed raw bytes from the EDA transport
    pub fn ingest_eda(&self, bytes: &[u8]) -> IngestReport {
        let mut report = IngestReport::default();
        let mut readings = Vec::new();
        let mut batches = Vec::new();

        {
            let mut eda = self.eda.lock();
            let results = eda.decoder.feed(bytes);

            for result in results {
                let frame = match result {
                    Ok(frame) => frame,
                    Err(_) => {
                        report.failures += 1;
                        continue;
                    }
                };

                let value = frame.raw_value;
                eda.stats.update(value);
                let split = eda.decomposer.decompose(value);
                eda.window.push(value, split);
                if let Some(slope) = eda.slope.update(value) {
                    eda.last_slope = Some(slope);
                }
                eda.latest_eda = value;

                if let Some(batch) = eda.buffer.push(BatchSample::from(&frame)) {
                    batches.push(batch);
                }

                readings.push(self.build_reading(value, Some(split)));
                report.frames += 1;
            }
        }

        report.batches = batches.len();
        for batch in batches {
            self.submit_batch(batch);
        }
        for reading in &readings {
            self.publish(reading);
        }
        report.reading = readings.pop();
        report
    }

    /// Deliver one validated HR sample from the protocol collaborator
    pub fn on_hr_sample(&self, sample: HrSample) -> ArousalReading {
        self.hr.dispatch(sample);
        let reading = self.reading();
        self.publish(&reading);
        reading
    }

    /// Current classification from the latest EDA and HR values
    pub fn reading(&self) -> ArousalReading {
        let eda = self.eda.lock();
        self.build_reading(eda.latest_eda, eda.decomposer.last())
    }

    /// Queue an annotation stamped `annotation_offset_ms` in the past.
    /// Returns the annotation timestamp, or `None` if it was not queued.
    pub fn annotate(&self) -> Option<i64> {
        let timestamp_ms = Utc::now().timestamp_millis() - self.config.annotation_offset_ms;
        self.submit(UploadPayload::Annotation { timestamp_ms })
            .then_some(timestamp_ms)
    }

    /// Hand the partially filled batch to the upload collaborator
    pub fn flush_pending(&self) -> bool {
        let batch = self.eda.lock().buffer.drain();
        match batch {
            Some(batch) => self.submit_batch(batch),
            None => false,
        }
    }

    /// Snapshot of the display window, oldest first
    pub fn trace(&self) -> Vec<TracePoint> {
        self.eda.lock().window.snapshot()
    }

    /// Live batch contents, oldest first
    pub fn buffered(&self) -> Vec<BatchSample> {
        self.eda.lock().buffer.live().to_vec()
    }

    pub fn eda_summary(&self) -> EdaSummary {
        let eda = self.eda.lock();
        EdaSummary {
            samples: eda.stats.count(),
            mean: eda.stats.mean(),
            stddev: eda.stats.stddev(),
            frames_decoded: eda.decoder.frames_decoded(),
            decode_failures: eda.decoder.failures(),
            batches_flushed: eda.buffer.batches_flushed(),
            buffered_samples: eda.buffer.len(),
            pending_bytes: eda.decoder.pending_len(),
            last_slope: eda.last_slope,
        }
    }

    /// Normalize a value against the running EDA statistics
    pub fn eda_z_score(&self, value: f32) -> Option<f64> {
        self.eda.lock().stats.z_score(value)
    }

    pub fn upload_metrics(&self) -> Option<UploadMetricsSnapshot> {
        self.uploads.lock().as_ref().map(|u| u.metrics())
    }

    /// Stop the upload thread after it delivers what is already queued
    pub fn close(&self) -> Result<Option<UploadMetricsSnapshot>, GlimError> {
        let dispatcher = self.uploads.lock().take();
        match dispatcher {
            Some(dispatcher) => {
                let metrics = dispatcher.shutdown()?;
                info!(
                    "Pipeline {} closed: {} uploads delivered, {} dropped",
                    self.instance_id, metrics.delivered, metrics.dropped
                );
                Ok(Some(metrics))
            }
            None => Ok(None),
        }
    }

    /// Callers hold the EDA lock, so sequence numbers follow the order in
    /// which readings observe the shared state.
    fn build_reading(&self, latest_eda: f32, split: Option<Decomposition>) -> ArousalReading {
        let latest_hr = self
            .hr
            .latest_heart_rate()
            .unwrap_or(self.config.baseline.base_hr());
        let stale_after = self.config.hr_stale_after_ms.map(Duration::from_millis);
        let classification = self.classifier.classify(latest_eda, latest_hr);

        ArousalReading {
            band: classification.band,
            total_shift: classification.total_shift,
            eda_level: classification.eda_level,
            hr_level: classification.hr_level,
            latest_eda,
            latest_hr,
            hr_zone: HrZone::from_heart_rate(latest_hr),
            hr_stale: self.hr.is_stale(stale_after),
            decomposition: split,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn publish(&self, reading: &ArousalReading) {
        let mut delivered = self.delivered.lock();
        if reading.sequence <= *delivered {
            debug!(
                "Skipping reading #{} behind delivered #{}",
                reading.sequence, *delivered
            );
            return;
        }
        *delivered = reading.sequence;
        for display in self.displays.read().iter() {
            display.on_update(reading);
        }
    }

    fn submit_batch(&self, batch: FrozenBatch) -> bool {
        debug!("Batch {} full ({} samples)", batch.id, batch.samples.len());
        self.submit(UploadPayload::Data(batch))
    }

    fn submit(&self, payload: UploadPayload) -> bool {
        match self.uploads.lock().as_ref() {
            Some(dispatcher) => dispatcher.submit(payload),
            None => {
                warn!("No upload collaborator; {:?} payload discarded", payload.kind());
                false
            }
        }
    }
}

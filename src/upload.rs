//! Upload payloads and hand-off
//!
//! Frozen batches and annotations are encoded in the legacy upload format and
//! passed to the upload collaborator on a dedicated thread. Ingestion never
//! waits for an upload: when the hand-off queue is full the payload is dropped
//! and counted.
//!
//! Wire format (one JSON object, one key):
//!
//! ```text
//! {"edasignal": "{1000,1.23\n1001,1.24}"}
//! {"annotation": 1393260041000}
//! ```

use crate::buffer::{BatchSample, FrozenBatch};
use crate::error::GlimError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// JSON key for data batches
pub const EDA_SIGNAL_KEY: &str = "edasignal";

/// JSON key for annotation events
pub const ANNOTATION_KEY: &str = "annotation";

/// Kind tag of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    Data,
    Annotation,
}

/// Payload handed to the upload collaborator
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPayload {
    Data(FrozenBatch),
    Annotation { timestamp_ms: i64 },
}

impl UploadPayload {
    pub fn kind(&self) -> BatchKind {
        match self {
            UploadPayload::Data(_) => BatchKind::Data,
            UploadPayload::Annotation { .. } => BatchKind::Annotation,
        }
    }

    /// Encode as the legacy single-key JSON object
    pub fn to_json(&self) -> String {
        let value = match self {
            UploadPayload::Data(batch) => json!({ EDA_SIGNAL_KEY: encode_batch(&batch.samples) }),
            UploadPayload::Annotation { timestamp_ms } => json!({ ANNOTATION_KEY: timestamp_ms }),
        };
        value.to_string()
    }

    /// Parse a legacy upload JSON object
    pub fn from_json(json: &str) -> Result<Self, GlimError> {
        let value: Value = serde_json::from_str(json)?;
        let object = value
            .as_object()
            .ok_or_else(|| GlimError::ParseError("payload is not a JSON object".to_string()))?;

        if let Some(signal) = object.get(EDA_SIGNAL_KEY) {
            let text = signal.as_str().ok_or_else(|| {
                GlimError::ParseError(format!("{} must be a string", EDA_SIGNAL_KEY))
            })?;
            return Ok(UploadPayload::Data(FrozenBatch::new(parse_batch(text)?)));
        }

        if let Some(annotation) = object.get(ANNOTATION_KEY) {
            let timestamp_ms = annotation.as_i64().ok_or_else(|| {
                GlimError::ParseError(format!("{} must be an integer", ANNOTATION_KEY))
            })?;
            return Ok(UploadPayload::Annotation { timestamp_ms });
        }

        Err(GlimError::ParseError(format!(
            "expected \"{}\" or \"{}\" key",
            EDA_SIGNAL_KEY, ANNOTATION_KEY
        )))
    }
}

/// Serialize samples as a brace-delimited, newline-joined list of
/// `timestamp,value` strings
pub fn encode_batch(samples: &[BatchSample]) -> String {
    let lines: Vec<String> = samples
        .iter()
        .map(|s| format!("{},{}", s.timestamp_ms, s.value))
        .collect();
    format!("{{{}}}", lines.join("\n"))
}

/// Parse the output of [`encode_batch`] back into ordered samples
pub fn parse_batch(text: &str) -> Result<Vec<BatchSample>, GlimError> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| GlimError::ParseError("batch must be wrapped in braces".to_string()))?;

    if inner.is_empty() {
        return Ok(Vec::new());
    }

    inner
        .split('\n')
        .enumerate()
        .map(|(i, line)| {
            let (ts, value) = line.split_once(',').ok_or_else(|| {
                GlimError::ParseError(format!("line {}: missing comma in {:?}", i + 1, line))
            })?;
            let timestamp_ms = ts.parse::<i64>().map_err(|e| {
                GlimError::ParseError(format!("line {}: bad timestamp {:?}: {}", i + 1, ts, e))
            })?;
            Ok(BatchSample::new(timestamp_ms, value))
        })
        .collect()
}

/// Error type returned by upload collaborators
pub type UploadError = Box<dyn std::error::Error + Send + Sync>;

/// The upload collaborator. Runs on the upload thread; its result is logged
/// and otherwise ignored, and failed uploads are not retried.
pub trait UploadSink: Send + 'static {
    fn upload(&self, payload: &UploadPayload) -> Result<(), UploadError>;
}

impl<F> UploadSink for F
where
    F: Fn(&UploadPayload) -> Result<(), UploadError> + Send + 'static,
{
    fn upload(&self, payload: &UploadPayload) -> Result<(), UploadError> {
        self(payload)
    }
}

/// Upload hand-off counters
#[derive(Debug, Default)]
pub struct UploadMetrics {
    pub submitted: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

impl UploadMetrics {
    pub fn snapshot(&self) -> UploadMetricsSnapshot {
        UploadMetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetricsSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

enum UploadCmd {
    Upload(UploadPayload),
    Shutdown,
}

/// Background hand-off to an [`UploadSink`]
pub struct UploadDispatcher {
    tx: Sender<UploadCmd>,
    metrics: Arc<UploadMetrics>,
    worker: Option<JoinHandle<()>>,
}

impl UploadDispatcher {
    /// Start the upload thread with room for `queue_depth` pending payloads
    pub fn start<S: UploadSink>(sink: S, queue_depth: usize) -> Result<Self, GlimError> {
        let (tx, rx) = bounded(queue_depth.max(1));
        let metrics = Arc::new(UploadMetrics::default());
        let metrics_clone = Arc::clone(&metrics);

        let worker = thread::Builder::new()
            .name("glim-upload".to_string())
            .spawn(move || Self::run(sink, rx, metrics_clone))?;

        Ok(Self {
            tx,
            metrics,
            worker: Some(worker),
        })
    }

    /// Queue a payload without blocking. Returns false if it was dropped.
    pub fn submit(&self, payload: UploadPayload) -> bool {
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(UploadCmd::Upload(payload)) {
            Ok(()) => true,
            Err(TrySendError::Full(UploadCmd::Upload(payload))) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                match &payload {
                    UploadPayload::Data(batch) => warn!(
                        "Upload queue full; dropping batch {} ({} samples)",
                        batch.id,
                        batch.samples.len()
                    ),
                    UploadPayload::Annotation { timestamp_ms } => {
                        warn!("Upload queue full; dropping annotation at {}", timestamp_ms)
                    }
                }
                false
            }
            Err(_) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Upload thread has stopped; payload dropped");
                false
            }
        }
    }

    pub fn metrics(&self) -> UploadMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Deliver everything already queued, then stop the upload thread
    pub fn shutdown(mut self) -> Result<UploadMetricsSnapshot, GlimError> {
        self.stop()?;
        Ok(self.metrics.snapshot())
    }

    fn stop(&mut self) -> Result<(), GlimError> {
        if let Some(worker) = self.worker.take() {
            // Blocks only until the worker makes room; it is still draining
            let _ = self.tx.send(UploadCmd::Shutdown);
            worker
                .join()
                .map_err(|_| GlimError::WorkerPanicked("glim-upload".to_string()))?;
        }
        Ok(())
    }

    fn run<S: UploadSink>(sink: S, rx: Receiver<UploadCmd>, metrics: Arc<UploadMetrics>) {
        info!("Upload thread started");
        for cmd in rx.iter() {
            match cmd {
                UploadCmd::Upload(payload) => match sink.upload(&payload) {
                    Ok(()) => {
                        metrics.delivered.fetch_add(1, Ordering::Relaxed);
                        debug!("Delivered {:?} payload", payload.kind());
                    }
                    Err(e) => {
                        metrics.failed.fetch_add(1, Ordering::Relaxed);
                        error!("Upload of {:?} payload failed: {}", payload.kind(), e);
                    }
                },
                UploadCmd::Shutdown => break,
            }
        }
        info!("Upload thread stopped");
    }
}

impl Drop for UploadDispatcher {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Upload dispatcher shutdown failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn test_encode_batch_legacy_format() {
        let samples = vec![BatchSample::new(1000, "1.23"), BatchSample::new(1001, "1.24")];
        assert_eq!(encode_batch(&samples), "{1000,1.23\n1001,1.24}");
    }

    #[test]
    fn test_data_payload_json() {
        let payload = UploadPayload::Data(FrozenBatch::new(vec![
            BatchSample::new(1000, "1.23"),
            BatchSample::new(1001, "1.24"),
        ]));
        assert_eq!(payload.kind(), BatchKind::Data);
        assert_eq!(
            payload.to_json(),
            r#"{"edasignal":"{1000,1.23\n1001,1.24}"}"#
        );
    }

    #[test]
    fn test_batch_roundtrip() {
        let samples = vec![BatchSample::new(1000, "1.23"), BatchSample::new(1001, "1.24")];
        let json = UploadPayload::Data(FrozenBatch::new(samples.clone())).to_json();

        match UploadPayload::from_json(&json).unwrap() {
            UploadPayload::Data(parsed) => assert_eq!(parsed.samples, samples),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_annotation_roundtrip() {
        let payload = UploadPayload::Annotation {
            timestamp_ms: 1_393_260_041_000,
        };
        assert_eq!(payload.to_json(), r#"{"annotation":1393260041000}"#);
        assert_eq!(UploadPayload::from_json(&payload.to_json()).unwrap(), payload);
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(encode_batch(&[]), "{}");
        assert!(parse_batch("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_batch("1000,1.23").is_err());
        assert!(parse_batch("{1000}").is_err());
        assert!(parse_batch("{abc,1.0}").is_err());
        assert!(UploadPayload::from_json(r#"{"other": 1}"#).is_err());
        assert!(UploadPayload::from_json("[]").is_err());
        assert!(UploadPayload::from_json("not json").is_err());
    }

    #[test]
    fn test_dispatcher_delivers_in_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        let sink = move |payload: &UploadPayload| -> Result<(), UploadError> {
            received_clone.lock().push(payload.to_json());
            Ok(())
        };

        let dispatcher = UploadDispatcher::start(sink, 8).unwrap();
        for ts in 0..3 {
            assert!(dispatcher.submit(UploadPayload::Annotation { timestamp_ms: ts }));
        }
        let metrics = dispatcher.shutdown().unwrap();

        assert_eq!(metrics.delivered, 3);
        assert_eq!(metrics.dropped, 0);
        assert_eq!(
            *received.lock(),
            vec![
                r#"{"annotation":0}"#.to_string(),
                r#"{"annotation":1}"#.to_string(),
                r#"{"annotation":2}"#.to_string(),
            ]
        );
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let sink = move |_: &UploadPayload| -> Result<(), UploadError> {
            // Hold the upload thread until the test releases it
            let _ = gate_rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        };

        let dispatcher = UploadDispatcher::start(sink, 1).unwrap();
        let mut accepted = 0;
        for ts in 0..10 {
            if dispatcher.submit(UploadPayload::Annotation { timestamp_ms: ts }) {
                accepted += 1;
            }
        }

        // At most one in flight plus one queued
        assert!(accepted <= 2);
        assert!(dispatcher.metrics().dropped >= 8);

        drop(gate_tx);
        let metrics = dispatcher.shutdown().unwrap();
        assert_eq!(metrics.submitted, 10);
        assert_eq!(metrics.delivered + metrics.dropped, 10);
    }

    #[test]
    fn test_sink_failure_is_counted() {
        let sink = |_: &UploadPayload| -> Result<(), UploadError> { Err("offline".into()) };
        let dispatcher = UploadDispatcher::start(sink, 2).unwrap();
        dispatcher.submit(UploadPayload::Annotation { timestamp_ms: 1 });
        let metrics = dispatcher.shutdown().unwrap();
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.delivered, 0);
    }
}

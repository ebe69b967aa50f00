//! Ingestion threads
//!
//! The EDA transport delivers bytes through any [`Read`] implementation and
//! the HR protocol collaborator delivers samples through a channel. Each
//! source gets its own named thread. Both threads poll a shared
//! [`StopFlag`] and exit promptly once it is raised.

use crate::error::GlimError;
use crate::pipeline::GlimPipeline;
use crate::types::HrSample;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Bytes requested from the EDA transport per read
pub const EDA_READ_CHUNK: usize = 1024;

/// Back-off after a transient read error
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// How long the HR thread waits before re-checking the stop flag
const HR_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cooperative shutdown signal shared by the ingestion threads
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawn the EDA ingestion thread.
///
/// The thread ends on end-of-stream, on a non-transient read error, or when
/// `stop` is raised. Timeouts and would-block errors are retried.
pub fn spawn_eda_worker<R>(
    pipeline: Arc<GlimPipeline>,
    mut reader: R,
    stop: StopFlag,
) -> Result<JoinHandle<Result<u64, GlimError>>, GlimError>
where
    R: Read + Send + 'static,
{
    let handle = thread::Builder::new()
        .name("glim-eda".to_string())
        .spawn(move || {
            let mut chunk = [0u8; EDA_READ_CHUNK];
            let mut frames = 0u64;
            info!("EDA thread started");

            while !stop.is_stopped() {
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        info!("EDA stream ended after {} frames", frames);
                        break;
                    }
                    Ok(n) => {
                        let report = pipeline.ingest_eda(&chunk[..n]);
                        frames += report.frames as u64;
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                        ) =>
                    {
                        thread::sleep(RETRY_DELAY);
                    }
                    Err(e) => {
                        error!("EDA read failed: {}", e);
                        return Err(GlimError::IoError(e));
                    }
                }
            }
            Ok(frames)
        })?;
    Ok(handle)
}

/// Spawn the HR ingestion thread. It ends when `stop` is raised or every
/// sender of `samples` has been dropped.
pub fn spawn_hr_worker(
    pipeline: Arc<GlimPipeline>,
    samples: Receiver<HrSample>,
    stop: StopFlag,
) -> Result<JoinHandle<Result<u64, GlimError>>, GlimError> {
    let handle = thread::Builder::new()
        .name("glim-hr".to_string())
        .spawn(move || {
            let mut packets = 0u64;
            info!("HR thread started");

            while !stop.is_stopped() {
                match samples.recv_timeout(HR_POLL_INTERVAL) {
                    Ok(sample) => {
                        pipeline.on_hr_sample(sample);
                        packets += 1;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("HR source closed after {} packets", packets);
                        break;
                    }
                }
            }
            Ok(packets)
        })?;
    Ok(handle)
}

/// Frames and packets processed by the ingestion threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerTotals {
    pub eda_frames: u64,
    pub hr_packets: u64,
}

/// Handles for a running pair of ingestion threads
pub struct Workers {
    stop: StopFlag,
    eda: Option<JoinHandle<Result<u64, GlimError>>>,
    hr: Option<JoinHandle<Result<u64, GlimError>>>,
}

impl Workers {
    /// Start both ingestion threads against one pipeline
    pub fn start<R>(
        pipeline: Arc<GlimPipeline>,
        eda_reader: R,
        hr_samples: Receiver<HrSample>,
    ) -> Result<Self, GlimError>
    where
        R: Read + Send + 'static,
    {
        let stop = StopFlag::new();
        let eda = spawn_eda_worker(Arc::clone(&pipeline), eda_reader, stop.clone())?;
        let hr = match spawn_hr_worker(pipeline, hr_samples, stop.clone()) {
            Ok(hr) => hr,
            Err(e) => {
                stop.stop();
                let _ = eda.join();
                return Err(e);
            }
        };
        Ok(Self {
            stop,
            eda: Some(eda),
            hr: Some(hr),
        })
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Wait for both threads to finish on their own (end of stream and
    /// closed HR source)
    pub fn join(mut self) -> Result<WorkerTotals, GlimError> {
        self.join_all()
    }

    /// Raise the stop flag and wait for both threads
    pub fn stop_and_join(mut self) -> Result<WorkerTotals, GlimError> {
        self.stop.stop();
        self.join_all()
    }

    fn join_all(&mut self) -> Result<WorkerTotals, GlimError> {
        let eda = join_named(self.eda.take(), "glim-eda");
        let hr = join_named(self.hr.take(), "glim-hr");
        Ok(WorkerTotals {
            eda_frames: eda?,
            hr_packets: hr?,
        })
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop.stop();
        if let Err(e) = self.join_all() {
            warn!("Ingestion thread ended with error during drop: {}", e);
        }
    }
}

fn join_named(
    handle: Option<JoinHandle<Result<u64, GlimError>>>,
    name: &str,
) -> Result<u64, GlimError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| GlimError::WorkerPanicked(name.to_string()))?,
        None => Ok(0),
    }
}

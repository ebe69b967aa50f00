//! Glim Flux - Real-time arousal estimation from EDA and heart rate
//!
//! Flux consumes two live physiological streams and turns them into a single
//! arousal band: raw EDA bytes → frame decoding → running statistics and
//! tonic/phasic decomposition → upload batching, with heart-rate packets
//! feeding the same classification.
//!
//! ## Modules
//!
//! - **Signal path**: `decoder`, `stats`, `decomposer`, `buffer`
//! - **Classification**: `classifier` maps both deviations onto a [`Band`]
//! - **Concurrency**: `dispatcher`, `upload`, `worker` move data between threads
//! - **Orchestration**: `pipeline` ties it all together

pub mod buffer;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod decomposer;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod stats;
pub mod types;
pub mod upload;
pub mod worker;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use classifier::{classify, ArousalClassifier};
pub use config::{Baseline, PipelineConfig};
pub use error::{DecodeError, GlimError};
pub use pipeline::{DisplaySink, EdaSummary, GlimPipeline, IngestReport};
pub use types::{ArousalReading, Band, Classification, Decomposition, EdaFrame, HrSample, HrZone};
pub use upload::{UploadPayload, UploadSink};
pub use worker::{StopFlag, Workers};

/// Glim Flux version
pub const GLIM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI and FFI
pub const PRODUCER_NAME: &str = "glim-flux";

//! Error types for Glim Flux

use thiserror::Error;

/// Errors that can occur while configuring or running the pipeline
#[derive(Debug, Error)]
pub enum GlimError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse upload payload: {0}")]
    ParseError(String),

    #[error("Worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Per-frame failures reported by the EDA frame decoder.
///
/// None of these are fatal: the offending line is dropped and decoding
/// continues with the next delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Frame exceeded {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },

    #[error("Expected at least {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Invalid EDA value: {0:?}")]
    InvalidValue(String),

    #[error("Frame contains non-ASCII bytes")]
    NonAscii,
}

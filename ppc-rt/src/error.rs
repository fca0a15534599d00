//! Error types for ppc-rt

use thiserror::Error;

/// Main error type for the realtime coaching service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON encoding/decoding of stored records
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Feature capture could not be acquired (permission denied, no device)
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// Evaluation worker crashed or could not be started
    #[error("Evaluation worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// Worker did not answer in time
    #[error("Evaluation timed out after {0} ms")]
    EvaluationTimeout(u64),

    /// Calibration, preset or event-log storage failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Unknown parent preset name
    #[error("Invalid preset: {0}")]
    InvalidPreset(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Errors bubbled up from the shared library
    #[error(transparent)]
    Common(#[from] ppc_common::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using ppc-rt Error
pub type Result<T> = std::result::Result<T, Error>;

//! Errors shared by the coaching crates

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bootstrap config file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A wire name (cue state, preset) that maps to no known variant
    #[error("Unknown {field}: {value}")]
    UnknownValue { field: &'static str, value: String },

    #[error("Event encoding failed: {0}")]
    EventEncoding(#[from] serde_json::Error),

    /// Realtime event payload failed validation
    #[error("Invalid {kind} payload: {}", .errors.join("; "))]
    InvalidPayload { kind: String, errors: Vec<String> },
}

//! # Practice Coach Common Library
//!
//! Shared code for the practice coach services including:
//! - Realtime contracts (cue states, confidence bands, parent presets)
//! - Event types (`RealtimeEvent` enum) and payload validation
//! - Configuration loading
//! - Database initialization
//! - Timestamp utilities

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod contracts;
pub mod error;
pub mod events;
pub mod time;
pub mod uuid_utils;

pub use contracts::{ConfidenceBand, CueDomain, CueState, ParentPreset};
pub use error::{Error, Result};
pub use events::{EventKind, RealtimeEvent};

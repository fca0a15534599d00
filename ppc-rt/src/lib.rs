//! # Practice Coach Realtime Engine (ppc-rt)
//!
//! Realtime instrumental-practice coaching: ingests pitch/rhythm feature
//! frames, decides when and how to cue the performer, and adapts a per-user
//! calibration profile while it listens.
//!
//! **Architecture:** one `SessionController` per process owning capture,
//! calibration and policy state, with policy evaluation offloaded to a worker
//! thread (or run inline), SQLite-backed storage adapters, and an HTTP/SSE
//! control surface.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod realtime;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;

//! Database access layer
//!
//! Settings queries plus the SQLite implementations of the realtime storage traits.

pub mod calibration;
pub mod event_log;
pub mod presets;
pub mod settings;

pub use calibration::SqliteCalibrationStore;
pub use event_log::SqliteEventLog;
pub use presets::SqlitePresetStore;

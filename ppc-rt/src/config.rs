//! ppc-rt runtime configuration
//!
//! Bootstrap settings (port, database path, worker flag) come from the TOML
//! file via `ppc_common::config`. Everything tunable at runtime lives in the
//! database `settings` table and is collected here once at startup.

use crate::realtime::calibration::CalibrationTuning;
use crate::realtime::policy::PolicyTuning;
use crate::realtime::quality::QualityConfig;
use std::time::Duration;

/// Runtime tuning loaded from the settings table
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub policy: PolicyTuning,
    pub calibration: CalibrationTuning,
    /// Minimum gap between throttled calibration writes
    pub profile_persist_interval_ms: u64,
    pub quality: QualityConfig,
    /// Minimum gap between per-frame `state` broadcasts
    pub state_publish_throttle_ms: u64,
    pub policy_eval_timeout_ms: u64,
    pub preset_apply_timeout_ms: u64,
    pub capture_frame_buffer: usize,
    /// Event log retention (rows)
    pub event_log_max_entries: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            policy: PolicyTuning::default(),
            calibration: CalibrationTuning::default(),
            profile_persist_interval_ms: 1000,
            quality: QualityConfig::default(),
            state_publish_throttle_ms: 120,
            policy_eval_timeout_ms: 120,
            preset_apply_timeout_ms: 180,
            capture_frame_buffer: 256,
            event_log_max_entries: 1500,
        }
    }
}

impl RuntimeSettings {
    pub fn eval_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_eval_timeout_ms)
    }

    pub fn preset_apply_timeout(&self) -> Duration {
        Duration::from_millis(self.preset_apply_timeout_ms)
    }
}

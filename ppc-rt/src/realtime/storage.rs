//! Storage seams used by the controller
//!
//! The core only knows these traits. SQLite implementations live in `crate::db`.

use async_trait::async_trait;
use ppc_common::contracts::ParentPreset;
use ppc_common::events::EventRecord;

use crate::error::Result;
use crate::realtime::calibration::CalibrationProfile;

/// Key-value home of the performer's calibration profile
#[async_trait]
pub trait CalibrationStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet
    async fn load(&self) -> Result<Option<CalibrationProfile>>;
    async fn save(&self, profile: &CalibrationProfile) -> Result<()>;
}

/// Remembers the last parent preset across sessions
#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn load_preset(&self) -> Result<Option<ParentPreset>>;
    async fn save_preset(&self, preset: ParentPreset) -> Result<()>;
}

/// Append-only log of coarse events
#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, record: &EventRecord) -> Result<()>;
}

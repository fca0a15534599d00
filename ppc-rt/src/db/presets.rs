//! Parent preset persistence
//!
//! The last preset chosen by a parent is kept under `rt_policy` and restored
//! when the next session starts.

use async_trait::async_trait;
use ppc_common::contracts::ParentPreset;
use sqlx::{Pool, Sqlite};
use tracing::warn;

use crate::db::settings::{get_setting, set_setting};
use crate::error::Result;
use crate::realtime::storage::PresetStore;

pub const PRESET_KEY: &str = "rt_policy";

#[derive(Clone)]
pub struct SqlitePresetStore {
    db: Pool<Sqlite>,
}

impl SqlitePresetStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PresetStore for SqlitePresetStore {
    async fn load_preset(&self) -> Result<Option<ParentPreset>> {
        let Some(raw) = get_setting::<String>(&self.db, PRESET_KEY).await? else {
            return Ok(None);
        };
        match raw.parse::<ParentPreset>() {
            Ok(preset) => Ok(Some(preset)),
            Err(e) => {
                warn!("Ignoring stored preset '{}': {}", raw, e);
                Ok(None)
            }
        }
    }

    async fn save_preset(&self, preset: ParentPreset) -> Result<()> {
        set_setting(&self.db, PRESET_KEY, preset).await
    }
}

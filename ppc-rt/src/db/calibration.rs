//! Calibration profile persistence
//!
//! The profile is a single JSON record in the settings table under `rt_profile`.

use async_trait::async_trait;
use sqlx::{Pool, Sqlite};

use crate::db::settings::{get_json_setting, set_json_setting};
use crate::error::Result;
use crate::realtime::calibration::CalibrationProfile;
use crate::realtime::storage::CalibrationStore;

pub const PROFILE_KEY: &str = "rt_profile";

#[derive(Clone)]
pub struct SqliteCalibrationStore {
    db: Pool<Sqlite>,
}

impl SqliteCalibrationStore {
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CalibrationStore for SqliteCalibrationStore {
    async fn load(&self) -> Result<Option<CalibrationProfile>> {
        get_json_setting(&self.db, PROFILE_KEY).await
    }

    async fn save(&self, profile: &CalibrationProfile) -> Result<()> {
        set_json_setting(&self.db, PROFILE_KEY, profile).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::settings::set_setting;
    use crate::error::Error;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        ppc_common::db::create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_missing_profile_loads_none() {
        let store = SqliteCalibrationStore::new(setup_test_db().await);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_profile_save_and_load() {
        let store = SqliteCalibrationStore::new(setup_test_db().await);
        let profile = CalibrationProfile {
            pitch_bias_cents: 3.25,
            rhythm_bias_ms: -14.0,
            sample_count: 42,
            last_session_at: Some(1_700_000_000_000),
            last_pitch_cents: Some(-2.5),
            last_tempo_bpm: Some(92.0),
            last_confidence: Some(0.84),
        };
        store.save(&profile).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_corrupt_profile_is_an_error() {
        let db = setup_test_db().await;
        set_setting(&db, PROFILE_KEY, "{\"pitch_bias_cents\": \"x\"}").await.unwrap();
        let store = SqliteCalibrationStore::new(db);
        assert!(matches!(store.load().await, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_profile_without_last_frame_fields_loads() {
        let db = setup_test_db().await;
        set_setting(
            &db,
            PROFILE_KEY,
            "{\"pitch_bias_cents\": 1.5, \"rhythm_bias_ms\": 4.0, \"sample_count\": 9}",
        )
        .await
        .unwrap();
        let profile = SqliteCalibrationStore::new(db).load().await.unwrap().unwrap();
        assert_eq!(profile.sample_count, 9);
        assert_eq!(profile.last_session_at, None);
    }
}

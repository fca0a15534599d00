//! Settings database access
//!
//! Read/write settings from the settings table (key-value store).
//! Runtime tuning is read once at startup; small records (calibration
//! profile, last preset, latest quality snapshot) are stored as JSON values.

use crate::config::RuntimeSettings;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::warn;

/// Load all runtime tuning, falling back to built-in defaults per key
pub async fn load_runtime_settings(db: &Pool<Sqlite>) -> Result<RuntimeSettings> {
    let defaults = RuntimeSettings::default();

    let policy = match get_json_setting(db, "policy_tuning").await {
        Ok(Some(tuning)) => tuning,
        Ok(None) => defaults.policy.clone(),
        Err(e) => {
            warn!("Ignoring invalid policy_tuning setting: {}", e);
            defaults.policy.clone()
        }
    };

    let calibration = match get_json_setting(db, "calibration_tuning").await {
        Ok(Some(tuning)) => tuning,
        Ok(None) => defaults.calibration,
        Err(e) => {
            warn!("Ignoring invalid calibration_tuning setting: {}", e);
            defaults.calibration
        }
    };

    let mut quality = defaults.quality;
    quality.window = load_clamped(db, "quality_window", quality.window as u64, 10, 5000).await? as usize;
    quality.snapshot_interval_ms = load_clamped(
        db,
        "quality_snapshot_interval_ms",
        quality.snapshot_interval_ms,
        1000,
        600_000,
    )
    .await?;
    quality.min_samples = load_clamped(db, "quality_min_samples", quality.min_samples, 1, 10_000).await?;

    Ok(RuntimeSettings {
        policy,
        calibration,
        profile_persist_interval_ms: load_clamped(
            db,
            "profile_persist_interval_ms",
            defaults.profile_persist_interval_ms,
            100,
            60_000,
        )
        .await?,
        quality,
        state_publish_throttle_ms: load_clamped(
            db,
            "state_publish_throttle_ms",
            defaults.state_publish_throttle_ms,
            16,
            5000,
        )
        .await?,
        policy_eval_timeout_ms: load_clamped(
            db,
            "policy_eval_timeout_ms",
            defaults.policy_eval_timeout_ms,
            10,
            5000,
        )
        .await?,
        preset_apply_timeout_ms: load_clamped(
            db,
            "preset_apply_timeout_ms",
            defaults.preset_apply_timeout_ms,
            10,
            5000,
        )
        .await?,
        capture_frame_buffer: load_clamped(
            db,
            "capture_frame_buffer",
            defaults.capture_frame_buffer as u64,
            1,
            4096,
        )
        .await? as usize,
        event_log_max_entries: load_clamped(
            db,
            "event_log_max_entries",
            defaults.event_log_max_entries,
            10,
            100_000,
        )
        .await?,
    })
}

/// Numeric setting with default and valid range
async fn load_clamped(db: &Pool<Sqlite>, key: &str, default: u64, min: u64, max: u64) -> Result<u64> {
    match get_setting::<u64>(db, key).await {
        Ok(Some(value)) => Ok(value.clamp(min, max)),
        Ok(None) => Ok(default),
        Err(Error::Config(msg)) => {
            warn!("{} (using default {})", msg, default);
            Ok(default)
        }
        Err(e) => Err(e),
    }
}

/// Generic setting getter
///
/// Returns None if key doesn't exist in database (or holds NULL).
/// Parses value from string using FromStr trait.
pub async fn get_setting<T: FromStr>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value.flatten() {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
///
/// Inserts or updates setting value.
pub async fn set_setting<T: ToString>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()> {
    let value_str = value.to_string();

    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value_str)
    .execute(db)
    .await?;

    Ok(())
}

/// JSON-encoded setting getter
pub async fn get_json_setting<T: DeserializeOwned>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>> {
    match get_setting::<String>(db, key).await? {
        Some(raw) if !raw.trim().is_empty() => Ok(Some(serde_json::from_str(&raw)?)),
        _ => Ok(None),
    }
}

/// JSON-encoded setting setter
pub async fn set_json_setting<T: Serialize>(db: &Pool<Sqlite>, key: &str, value: &T) -> Result<()> {
    set_setting(db, key, serde_json::to_string(value)?).await
}

/// Remove a setting
pub async fn delete_setting(db: &Pool<Sqlite>, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(db)
        .await?;
    Ok(())
}

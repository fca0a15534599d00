//! Database initialization
//!
//! Opens (or creates) the SQLite database and brings the schema up to date.
//! All table creation is idempotent, so it runs on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Built-in runtime setting defaults written on first run
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    // Calibration persistence throttle
    ("profile_persist_interval_ms", "1000"),
    // Quality metrics
    ("quality_window", "300"),
    ("quality_snapshot_interval_ms", "30000"),
    ("quality_min_samples", "10"),
    // Live state publication
    ("state_publish_throttle_ms", "120"),
    // Evaluation offload
    ("policy_eval_timeout_ms", "120"),
    ("preset_apply_timeout_ms", "180"),
    // Feature source
    ("capture_frame_buffer", "256"),
    // Event log retention
    ("event_log_max_entries", "1500"),
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL lets the event log append while settings are read
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;
    init_default_settings(&pool).await?;

    Ok(pool)
}

/// Create all tables used by the realtime engine
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_rt_events_table(pool).await?;
    Ok(())
}

/// Create the settings table
///
/// Stores application configuration and small persisted records
/// (calibration profile, last preset, latest quality snapshot) as key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the append-only realtime event log table
pub async fn create_rt_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rt_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            detail TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rt_events_kind ON rt_events(kind)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Ensure every built-in setting exists; NULL values are reset to defaults
pub async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    for (key, default_value) in DEFAULT_SETTINGS {
        ensure_setting(pool, key, default_value).await?;
    }
    Ok(())
}

async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match value {
        None => {
            // INSERT OR IGNORE tolerates concurrent initialization
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
        }
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            info!("Reset NULL setting '{}' to default value: {}", key, default_value);
        }
        Some(Some(_)) => {}
    }

    Ok(())
}

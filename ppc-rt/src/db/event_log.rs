//! Realtime event log
//!
//! Append-only `rt_events` table, trimmed to a retention window after each
//! append. The most recent quality snapshot is also kept under `rt_quality`
//! so it survives restarts.
//!
//! The log stores whatever it is given; keeping per-frame state out of it is
//! the controller's job.

use async_trait::async_trait;
use ppc_common::events::{EventKind, EventRecord, QualitySnapshot};
use sqlx::{Pool, Row, Sqlite};
use tracing::warn;

use crate::db::settings::{get_json_setting, set_setting};
use crate::error::Result;
use crate::realtime::storage::EventLog;

pub const QUALITY_KEY: &str = "rt_quality";

#[derive(Clone)]
pub struct SqliteEventLog {
    db: Pool<Sqlite>,
    max_entries: u64,
}

impl SqliteEventLog {
    pub fn new(db: Pool<Sqlite>, max_entries: u64) -> Self {
        Self {
            db,
            max_entries: max_entries.max(1),
        }
    }

    /// Most recent events, oldest first, optionally filtered by kind
    pub async fn recent(&self, limit: u32, kind: Option<EventKind>) -> Result<Vec<EventRecord>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT kind, timestamp_ms, detail FROM rt_events WHERE kind = ? ORDER BY id DESC LIMIT ?",
                )
                .bind(kind.as_str())
                .bind(limit as i64)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query("SELECT kind, timestamp_ms, detail FROM rt_events ORDER BY id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.db)
                    .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows.into_iter().rev() {
            let kind_str: String = row.get("kind");
            let Some(kind) = EventKind::parse(&kind_str) else {
                warn!("Skipping event log row with unknown kind '{}'", kind_str);
                continue;
            };
            let detail: String = row.get("detail");
            records.push(EventRecord {
                kind,
                timestamp: row.get("timestamp_ms"),
                detail: serde_json::from_str(&detail)?,
            });
        }
        Ok(records)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rt_events")
            .fetch_one(&self.db)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Drop every logged event and the stored quality snapshot
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM rt_events").execute(&self.db).await?;
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(QUALITY_KEY)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn latest_quality(&self) -> Result<Option<QualitySnapshot>> {
        get_json_setting(&self.db, QUALITY_KEY).await
    }

    async fn trim(&self) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM rt_events
            WHERE id NOT IN (SELECT id FROM rt_events ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(self.max_entries as i64)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for SqliteEventLog {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        let detail = serde_json::to_string(&record.detail)?;
        sqlx::query("INSERT INTO rt_events (kind, timestamp_ms, detail) VALUES (?, ?, ?)")
            .bind(record.kind.as_str())
            .bind(record.timestamp)
            .bind(&detail)
            .execute(&self.db)
            .await?;

        if record.kind == EventKind::Quality {
            set_setting(&self.db, QUALITY_KEY, &detail).await?;
        }

        self.trim().await
    }
}

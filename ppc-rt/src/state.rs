//! Shared service state
//!
//! Thread-safe state shared between the session controller and the HTTP/SSE
//! layer: the realtime event broadcaster and the latest quality snapshot.

use ppc_common::events::{QualitySnapshot, RealtimeEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<RealtimeEvent>,

    /// Most recent quality snapshot of this process
    pub latest_quality: RwLock<Option<QualitySnapshot>>,

    /// Events refused by payload validation
    pub blocked_events_total: AtomicU64,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            event_tx,
            latest_quality: RwLock::new(None),
            blocked_events_total: AtomicU64::new(0),
        }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: RealtimeEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.event_tx.subscribe()
    }

    pub async fn get_latest_quality(&self) -> Option<QualitySnapshot> {
        self.latest_quality.read().await.clone()
    }

    pub async fn set_latest_quality(&self, snapshot: QualitySnapshot) {
        *self.latest_quality.write().await = Some(snapshot);
    }

    pub fn increment_blocked_events(&self) {
        self.blocked_events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_blocked_events(&self) -> u64 {
        self.blocked_events_total.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

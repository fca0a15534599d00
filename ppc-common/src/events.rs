//! Event types for the realtime coaching event stream
//!
//! Every event is broadcast to live subscribers. Only coarse, bounded-rate
//! kinds are written to the event log; per-frame `State` snapshots never are.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contracts::{ConfidenceBand, CueDomain, CueState, ParentPreset};
use crate::{Error, Result};

/// Realtime event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    /// Session acquired capture and started listening
    SessionStarted {
        session_id: String,
        started_at: i64,
        source_view: String,
    },

    /// Session torn down
    SessionStopped {
        session_id: String,
        stopped_at: i64,
        reason: String,
    },

    /// Cue dispatched to the performer
    Cue(CueDecision),

    /// Throttled listening-state snapshot for live displays (never persisted)
    State(StatePayload),

    /// Coaching degraded to a fallback mode
    Fallback {
        session_id: String,
        reason: String,
        mode: String,
        at: i64,
    },

    /// Parent changed the coaching preset
    ParentOverride {
        preset: ParentPreset,
        previous_preset: ParentPreset,
        source: String,
        at: i64,
    },

    /// Aggregate session quality metrics
    Quality(QualitySnapshot),
}

/// Coarse event classification used by the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    SessionStarted,
    SessionStopped,
    Cue,
    State,
    Fallback,
    ParentOverride,
    Quality,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::SessionStarted,
        EventKind::SessionStopped,
        EventKind::Cue,
        EventKind::State,
        EventKind::Fallback,
        EventKind::ParentOverride,
        EventKind::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStarted => "session-started",
            EventKind::SessionStopped => "session-stopped",
            EventKind::Cue => "cue",
            EventKind::State => "state",
            EventKind::Fallback => "fallback",
            EventKind::ParentOverride => "parent-override",
            EventKind::Quality => "quality",
        }
    }

    /// Whether events of this kind may be appended to durable storage.
    ///
    /// `State` is emitted per processed frame and would grow storage with the
    /// audio frame rate.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, EventKind::State)
    }

    pub fn parse(s: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single policy cue decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CueDecision {
    pub id: String,
    pub state: CueState,
    pub message: String,
    pub confidence_band: ConfidenceBand,
    pub priority: u8,
    /// Minimum on-screen time before another cue may replace this one
    pub dwell_ms: u64,
    pub domain: CueDomain,
    pub urgent: bool,
    /// Set for the sustained-low-confidence helper cue
    pub fallback: bool,
    pub issued_at: i64,
    pub preset: ParentPreset,
}

/// Summary of the latest frame for live displays
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub frequency_hz: f64,
    pub note: String,
    pub pitch_cents: f64,
    pub tempo_bpm: f64,
    pub confidence: f64,
}

/// Listening-state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub session_id: String,
    pub listening: bool,
    pub paused: bool,
    pub confidence_band: ConfidenceBand,
    pub cue_state: CueState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_feature: Option<FeatureSummary>,
    pub timestamp: i64,
}

/// Session quality metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub session_id: String,
    pub p95_cue_latency_ms: f64,
    pub false_correction_rate: f64,
    pub fallback_rate: f64,
    pub sample_count: u64,
    pub at: i64,
}

/// Persisted form of an event: `append(type, timestamp, detail)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: i64,
    pub detail: serde_json::Value,
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::SessionStarted { .. } => EventKind::SessionStarted,
            RealtimeEvent::SessionStopped { .. } => EventKind::SessionStopped,
            RealtimeEvent::Cue(_) => EventKind::Cue,
            RealtimeEvent::State(_) => EventKind::State,
            RealtimeEvent::Fallback { .. } => EventKind::Fallback,
            RealtimeEvent::ParentOverride { .. } => EventKind::ParentOverride,
            RealtimeEvent::Quality(_) => EventKind::Quality,
        }
    }

    /// Wall-clock time the event describes (ms since epoch)
    pub fn timestamp(&self) -> i64 {
        match self {
            RealtimeEvent::SessionStarted { started_at, .. } => *started_at,
            RealtimeEvent::SessionStopped { stopped_at, .. } => *stopped_at,
            RealtimeEvent::Cue(cue) => cue.issued_at,
            RealtimeEvent::State(state) => state.timestamp,
            RealtimeEvent::Fallback { at, .. } => *at,
            RealtimeEvent::ParentOverride { at, .. } => *at,
            RealtimeEvent::Quality(quality) => quality.at,
        }
    }

    /// Convert to the `(type, timestamp, detail)` record the event log stores
    pub fn to_record(&self) -> Result<EventRecord> {
        let mut detail = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut detail {
            map.remove("type");
        }
        Ok(EventRecord {
            kind: self.kind(),
            timestamp: self.timestamp(),
            detail,
        })
    }

    /// Check payload invariants before the event is emitted
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        match self {
            RealtimeEvent::SessionStarted {
                session_id,
                started_at,
                source_view,
            } => {
                require_text(&mut errors, "session_id", session_id);
                require_time(&mut errors, "started_at", *started_at);
                require_text(&mut errors, "source_view", source_view);
            }
            RealtimeEvent::SessionStopped {
                session_id,
                stopped_at,
                reason,
            } => {
                require_text(&mut errors, "session_id", session_id);
                require_time(&mut errors, "stopped_at", *stopped_at);
                require_text(&mut errors, "reason", reason);
            }
            RealtimeEvent::Cue(cue) => {
                require_text(&mut errors, "id", &cue.id);
                require_text(&mut errors, "message", &cue.message);
                require_time(&mut errors, "issued_at", cue.issued_at);
            }
            RealtimeEvent::State(state) => {
                require_text(&mut errors, "session_id", &state.session_id);
                require_time(&mut errors, "timestamp", state.timestamp);
                if let Some(view_id) = &state.view_id {
                    require_text(&mut errors, "view_id", view_id);
                }
                if let Some(feature) = &state.last_feature {
                    require_finite(&mut errors, "last_feature.frequency_hz", feature.frequency_hz);
                    require_finite(&mut errors, "last_feature.pitch_cents", feature.pitch_cents);
                    require_finite(&mut errors, "last_feature.tempo_bpm", feature.tempo_bpm);
                    require_finite(&mut errors, "last_feature.confidence", feature.confidence);
                }
            }
            RealtimeEvent::Fallback {
                session_id,
                reason,
                mode,
                at,
            } => {
                require_text(&mut errors, "session_id", session_id);
                require_text(&mut errors, "reason", reason);
                require_text(&mut errors, "mode", mode);
                require_time(&mut errors, "at", *at);
            }
            RealtimeEvent::ParentOverride { source, at, .. } => {
                require_text(&mut errors, "source", source);
                require_time(&mut errors, "at", *at);
            }
            RealtimeEvent::Quality(quality) => {
                require_text(&mut errors, "session_id", &quality.session_id);
                require_finite(&mut errors, "p95_cue_latency_ms", quality.p95_cue_latency_ms);
                require_finite(&mut errors, "false_correction_rate", quality.false_correction_rate);
                require_finite(&mut errors, "fallback_rate", quality.fallback_rate);
                require_time(&mut errors, "at", quality.at);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPayload {
                kind: self.kind().to_string(),
                errors,
            })
        }
    }
}

fn require_text(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{} must be a non-empty string", field));
    }
}

fn require_finite(errors: &mut Vec<String>, field: &str, value: f64) {
    if !value.is_finite() {
        errors.push(format!("{} must be a finite number", field));
    }
}

fn require_time(errors: &mut Vec<String>, field: &str, value: i64) {
    if value < 0 {
        errors.push(format!("{} must be a non-negative timestamp", field));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cue() -> CueDecision {
        CueDecision {
            id: "rt-cue-1".to_string(),
            state: CueState::AdjustDown,
            message: "A little lower.".to_string(),
            confidence_band: ConfidenceBand::High,
            priority: 3,
            dwell_ms: 1000,
            domain: CueDomain::Pitch,
            urgent: true,
            fallback: false,
            issued_at: 1_700_000_000_000,
            preset: ParentPreset::Standard,
        }
    }

    #[test]
    fn test_state_is_the_only_unpersisted_kind() {
        let unpersisted: Vec<_> = EventKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_persistable())
            .collect();
        assert_eq!(unpersisted, vec![EventKind::State]);
    }

    #[test]
    fn test_event_serializes_with_kebab_type_tag() {
        let event = RealtimeEvent::ParentOverride {
            preset: ParentPreset::Challenge,
            previous_preset: ParentPreset::Standard,
            source: "parent-zone".to_string(),
            at: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "parent-override");
        assert_eq!(json["preset"], "challenge");
        assert_eq!(json["previous_preset"], "standard");
    }

    #[test]
    fn test_record_strips_type_and_keeps_timestamp() {
        let event = RealtimeEvent::Cue(sample_cue());
        let record = event.to_record().unwrap();
        assert_eq!(record.kind, EventKind::Cue);
        assert_eq!(record.timestamp, 1_700_000_000_000);
        assert!(record.detail.get("type").is_none());
        assert_eq!(record.detail["state"], "adjust-down");
    }

    #[test]
    fn test_validate_rejects_blank_strings_and_nan() {
        let mut cue = sample_cue();
        cue.message = "  ".to_string();
        let err = RealtimeEvent::Cue(cue).validate().unwrap_err();
        assert!(err.to_string().contains("message must be a non-empty string"));

        let quality = RealtimeEvent::Quality(QualitySnapshot {
            session_id: "rt-1".to_string(),
            p95_cue_latency_ms: f64::NAN,
            false_correction_rate: 0.0,
            fallback_rate: 0.0,
            sample_count: 3,
            at: 1,
        });
        assert!(quality.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_well_formed_events() {
        assert!(RealtimeEvent::Cue(sample_cue()).validate().is_ok());
        let stopped = RealtimeEvent::SessionStopped {
            session_id: "rt-1".to_string(),
            stopped_at: 10,
            reason: "manual-stop".to_string(),
        };
        assert!(stopped.validate().is_ok());
    }

    #[test]
    fn test_event_kind_parse_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("raw-frame"), None);
    }
}

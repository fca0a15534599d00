//! Policy engine
//!
//! Pure cue decision logic. `evaluate` takes a corrected frame and the current
//! `PolicyState` and returns an optional cue plus the next state; it never
//! touches I/O, so the same function runs on the worker thread and inline.
//!
//! Presets only change numbers (tolerances, cooldown, confidence floor, dwell).
//! The hard rails apply to every preset.

use ppc_common::contracts::{ConfidenceBand, CueDomain, CueState, ParentPreset};
use ppc_common::events::CueDecision;
use serde::{Deserialize, Serialize};

use crate::realtime::feature::FeatureFrame;

const MSG_LISTENING: &str = "Listening for your sound...";
const MSG_HELPER_TONE: &str = "Let us use a helper tone for a moment.";
const MSG_RESET: &str = "Tiny reset. One slow bow, then try again.";
const MSG_LOWER: &str = "A little lower.";
const MSG_HIGHER: &str = "A little higher.";
const MSG_SOONER: &str = "Bow a tiny bit sooner.";
const MSG_LATER: &str = "Bow a tiny bit later.";
const MSG_STEADY: &str = "Nice and steady.";
const MSG_LOCKED: &str = "Locked in. Keep that sound.";

/// Per-preset numbers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresetBounds {
    pub pitch_tolerance_cents: f64,
    pub rhythm_tolerance_ms: f64,
    pub cue_cooldown_ms: u64,
    /// Frames below this confidence count as low-confidence
    pub confidence_floor: f64,
    /// Minimum on-screen time of a cue
    pub dwell_ms: u64,
    /// Shorter dwell for urgent high-confidence corrections
    pub urgent_dwell_ms: u64,
}

impl PresetBounds {
    pub fn gentle() -> Self {
        Self {
            pitch_tolerance_cents: 12.0,
            rhythm_tolerance_ms: 120.0,
            cue_cooldown_ms: 1300,
            confidence_floor: 0.45,
            dwell_ms: 1700,
            urgent_dwell_ms: 1000,
        }
    }

    pub fn standard() -> Self {
        Self {
            pitch_tolerance_cents: 8.0,
            rhythm_tolerance_ms: 90.0,
            cue_cooldown_ms: 1050,
            confidence_floor: 0.45,
            dwell_ms: 1700,
            urgent_dwell_ms: 1000,
        }
    }

    pub fn challenge() -> Self {
        Self {
            pitch_tolerance_cents: 6.0,
            rhythm_tolerance_ms: 70.0,
            cue_cooldown_ms: 900,
            confidence_floor: 0.5,
            dwell_ms: 1700,
            urgent_dwell_ms: 1000,
        }
    }
}

/// Limits that hold regardless of preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardRails {
    pub one_cue_at_a_time: bool,
    pub max_consecutive_corrections: u32,
    pub low_confidence_fallback_frames: u32,
    pub min_cooldown_ms: u64,
    pub max_cooldown_ms: u64,
    /// In-tolerance cues in a row before a celebration
    pub celebrate_streak: u32,
    /// Urgency multipliers applied to the tolerances
    pub pitch_urgency_factor: f64,
    pub rhythm_urgency_factor: f64,
}

impl Default for HardRails {
    fn default() -> Self {
        Self {
            one_cue_at_a_time: true,
            max_consecutive_corrections: 2,
            low_confidence_fallback_frames: 24,
            min_cooldown_ms: 800,
            max_cooldown_ms: 3000,
            celebrate_streak: 4,
            pitch_urgency_factor: 2.0,
            rhythm_urgency_factor: 1.6,
        }
    }
}

/// Preset table plus rails (stored as JSON under `policy_tuning`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyTuning {
    pub gentle: PresetBounds,
    pub standard: PresetBounds,
    pub challenge: PresetBounds,
    pub rails: HardRails,
}

impl Default for PolicyTuning {
    fn default() -> Self {
        Self {
            gentle: PresetBounds::gentle(),
            standard: PresetBounds::standard(),
            challenge: PresetBounds::challenge(),
            rails: HardRails::default(),
        }
    }
}

impl PolicyTuning {
    pub fn bounds(&self, preset: ParentPreset) -> PresetBounds {
        match preset {
            ParentPreset::Gentle => self.gentle,
            ParentPreset::Standard => self.standard,
            ParentPreset::Challenge => self.challenge,
        }
    }

    pub fn initial_state(&self, preset: ParentPreset) -> PolicyState {
        PolicyState {
            preset,
            preset_revision: 0,
            bounds: self.bounds(preset),
            rails: self.rails,
            last_cue_at: None,
            last_cue_state: None,
            last_cue_dwell_ms: 0,
            consecutive_corrections: 0,
            low_confidence_frames: 0,
            steady_streak: 0,
            cue_counter: 0,
        }
    }

    /// Switch an existing state to another preset, keeping its history
    pub fn apply_preset(&self, state: &PolicyState, preset: ParentPreset) -> PolicyState {
        PolicyState {
            preset,
            bounds: self.bounds(preset),
            rails: self.rails,
            ..state.clone()
        }
    }
}

/// Mutable policy state owned by the controller
///
/// Evaluation works on a copy and hands back the next state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    pub preset: ParentPreset,
    /// Bumped by the controller on every preset change
    pub preset_revision: u64,
    pub bounds: PresetBounds,
    pub rails: HardRails,
    pub last_cue_at: Option<i64>,
    pub last_cue_state: Option<CueState>,
    pub last_cue_dwell_ms: u64,
    pub consecutive_corrections: u32,
    pub low_confidence_frames: u32,
    pub steady_streak: u32,
    pub cue_counter: u64,
}

impl PolicyState {
    /// How long after a cue every other cue is held back
    pub fn suppression_window_ms(&self) -> u64 {
        let cooldown = self
            .bounds
            .cue_cooldown_ms
            .clamp(self.rails.min_cooldown_ms, self.rails.max_cooldown_ms.max(self.rails.min_cooldown_ms));
        if self.rails.one_cue_at_a_time {
            cooldown.max(self.last_cue_dwell_ms)
        } else {
            cooldown
        }
    }

    pub fn is_suppressed(&self, now_ms: i64) -> bool {
        match self.last_cue_at {
            Some(at) => now_ms - at < self.suppression_window_ms() as i64,
            None => false,
        }
    }
}

struct CueTemplate {
    state: CueState,
    message: &'static str,
    domain: CueDomain,
    priority: u8,
    urgent: bool,
    fallback: bool,
}

fn issue(next: &mut PolicyState, cue: CueTemplate, band: ConfidenceBand, now_ms: i64) -> CueDecision {
    let dwell_ms = if cue.urgent && band == ConfidenceBand::High {
        next.bounds.urgent_dwell_ms
    } else {
        next.bounds.dwell_ms
    };
    next.cue_counter += 1;
    next.last_cue_at = Some(now_ms);
    next.last_cue_state = Some(cue.state);
    next.last_cue_dwell_ms = dwell_ms;

    CueDecision {
        id: format!("rt-cue-{}", next.cue_counter),
        state: cue.state,
        message: cue.message.to_string(),
        confidence_band: band,
        priority: cue.priority,
        dwell_ms,
        domain: cue.domain,
        urgent: cue.urgent,
        fallback: cue.fallback,
        issued_at: now_ms,
        preset: next.preset,
    }
}

/// Decide whether and how to cue for one frame
pub fn evaluate(
    frame: &FeatureFrame,
    state: &PolicyState,
    now_ms: i64,
) -> (Option<CueDecision>, PolicyState) {
    let mut next = state.clone();
    let confidence = if frame.confidence.is_finite() {
        frame.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let band = if frame.has_signal {
        ConfidenceBand::from_score(confidence)
    } else {
        ConfidenceBand::Low
    };

    if !frame.has_signal || confidence < next.bounds.confidence_floor {
        next.low_confidence_frames += 1;
        next.steady_streak = 0;

        if next.low_confidence_frames >= next.rails.low_confidence_fallback_frames {
            next.low_confidence_frames = 0;
            next.consecutive_corrections = 0;
            let cue = issue(
                &mut next,
                CueTemplate {
                    state: CueState::RetryCalm,
                    message: MSG_HELPER_TONE,
                    domain: CueDomain::System,
                    priority: 3,
                    urgent: false,
                    fallback: true,
                },
                band,
                now_ms,
            );
            return (Some(cue), next);
        }

        if next.is_suppressed(now_ms) {
            return (None, next);
        }
        let cue = issue(
            &mut next,
            CueTemplate {
                state: CueState::Listening,
                message: MSG_LISTENING,
                domain: CueDomain::System,
                priority: 1,
                urgent: false,
                fallback: false,
            },
            band,
            now_ms,
        );
        return (Some(cue), next);
    }

    next.low_confidence_frames = 0;

    if next.is_suppressed(now_ms) {
        return (None, next);
    }

    let pitch = if frame.pitch_cents.is_finite() { frame.pitch_cents } else { 0.0 };
    let rhythm = if frame.rhythm_offset_ms.is_finite() { frame.rhythm_offset_ms } else { 0.0 };
    let bounds = next.bounds;
    let rails = next.rails;
    let pitch_out = pitch.abs() > bounds.pitch_tolerance_cents;
    let rhythm_out = rhythm.abs() > bounds.rhythm_tolerance_ms;

    if (pitch_out || rhythm_out) && next.consecutive_corrections >= rails.max_consecutive_corrections {
        next.consecutive_corrections = 0;
        next.steady_streak = 0;
        let cue = issue(
            &mut next,
            CueTemplate {
                state: CueState::RetryCalm,
                message: MSG_RESET,
                domain: CueDomain::System,
                priority: 3,
                urgent: false,
                fallback: false,
            },
            band,
            now_ms,
        );
        return (Some(cue), next);
    }

    let high = band == ConfidenceBand::High;

    if pitch_out {
        next.consecutive_corrections += 1;
        next.steady_streak = 0;
        let sharp = pitch > 0.0;
        let cue = issue(
            &mut next,
            CueTemplate {
                state: if sharp { CueState::AdjustDown } else { CueState::AdjustUp },
                message: if sharp { MSG_LOWER } else { MSG_HIGHER },
                domain: CueDomain::Pitch,
                priority: 3,
                urgent: high && pitch.abs() > bounds.pitch_tolerance_cents * rails.pitch_urgency_factor,
                fallback: false,
            },
            band,
            now_ms,
        );
        return (Some(cue), next);
    }

    if rhythm_out {
        next.consecutive_corrections += 1;
        next.steady_streak = 0;
        let late = rhythm > 0.0;
        let cue = issue(
            &mut next,
            CueTemplate {
                state: if late { CueState::AdjustUp } else { CueState::AdjustDown },
                message: if late { MSG_SOONER } else { MSG_LATER },
                domain: CueDomain::Rhythm,
                priority: 2,
                urgent: high && rhythm.abs() > bounds.rhythm_tolerance_ms * rails.rhythm_urgency_factor,
                fallback: false,
            },
            band,
            now_ms,
        );
        return (Some(cue), next);
    }

    next.consecutive_corrections = 0;
    next.steady_streak += 1;
    let celebrate = rails.celebrate_streak > 0 && next.steady_streak >= rails.celebrate_streak;
    if celebrate {
        next.steady_streak = 0;
    }
    let cue = issue(
        &mut next,
        CueTemplate {
            state: if celebrate { CueState::CelebrateLock } else { CueState::Steady },
            message: if celebrate { MSG_LOCKED } else { MSG_STEADY },
            domain: CueDomain::System,
            priority: 1,
            urgent: false,
            fallback: false,
        },
        band,
        now_ms,
    );
    (Some(cue), next)
}

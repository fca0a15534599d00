//! Realtime contracts shared between the coaching engine and its consumers
//!
//! String forms match the wire format used by the event stream and the
//! parent control surface (`adjust-up`, `standard`, `high`, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Coaching cue shown to the performer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CueState {
    Listening,
    Steady,
    AdjustUp,
    AdjustDown,
    RetryCalm,
    CelebrateLock,
}

impl CueState {
    pub const ALL: [CueState; 6] = [
        CueState::Listening,
        CueState::Steady,
        CueState::AdjustUp,
        CueState::AdjustDown,
        CueState::RetryCalm,
        CueState::CelebrateLock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CueState::Listening => "listening",
            CueState::Steady => "steady",
            CueState::AdjustUp => "adjust-up",
            CueState::AdjustDown => "adjust-down",
            CueState::RetryCalm => "retry-calm",
            CueState::CelebrateLock => "celebrate-lock",
        }
    }

    /// Directional corrections (the cues the consecutive-correction rail counts)
    pub fn is_correction(&self) -> bool {
        matches!(self, CueState::AdjustUp | CueState::AdjustDown)
    }
}

impl fmt::Display for CueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CueState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CueState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::UnknownValue {
                field: "cue state",
                value: s.to_string(),
            })
    }
}

/// Coarse confidence classification of a measurement or cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    Low,
    Medium,
    High,
}

impl ConfidenceBand {
    pub const MEDIUM_THRESHOLD: f64 = 0.45;
    pub const HIGH_THRESHOLD: f64 = 0.75;

    /// Classify a raw confidence score; non-finite scores count as zero
    pub fn from_score(score: f64) -> Self {
        let score = if score.is_finite() { score } else { 0.0 };
        if score >= Self::HIGH_THRESHOLD {
            ConfidenceBand::High
        } else if score >= Self::MEDIUM_THRESHOLD {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceBand::Low => "low",
            ConfidenceBand::Medium => "medium",
            ConfidenceBand::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parent-selected bundle of tolerances and rails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentPreset {
    Gentle,
    #[default]
    Standard,
    Challenge,
}

impl ParentPreset {
    pub const ALL: [ParentPreset; 3] = [
        ParentPreset::Gentle,
        ParentPreset::Standard,
        ParentPreset::Challenge,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParentPreset::Gentle => "gentle",
            ParentPreset::Standard => "standard",
            ParentPreset::Challenge => "challenge",
        }
    }
}

impl fmt::Display for ParentPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParentPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ParentPreset::ALL
            .into_iter()
            .find(|preset| preset.as_str() == s.trim())
            .ok_or_else(|| Error::UnknownValue {
                field: "parent preset",
                value: s.to_string(),
            })
    }
}

/// What a cue is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueDomain {
    Pitch,
    Rhythm,
    System,
}

impl CueDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            CueDomain::Pitch => "pitch",
            CueDomain::Rhythm => "rhythm",
            CueDomain::System => "system",
        }
    }
}

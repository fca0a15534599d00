//! Performer calibration profile
//!
//! Learns a slowly-adapting pitch and timing bias from high-confidence frames.
//! The profile is loaded once per session, nudged by an EMA on each eligible
//! frame and persisted through a throttle, with a forced write on stop.
//! Nothing is written until the stored profile has actually been read.

use serde::{Deserialize, Serialize};

use crate::realtime::feature::FeatureFrame;

/// Persisted per-performer calibration
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub pitch_bias_cents: f64,
    pub rhythm_bias_ms: f64,
    /// Number of frames folded into the biases; never decreases
    pub sample_count: u64,
    /// Last learned-from frame, kept for display between sessions
    #[serde(default)]
    pub last_session_at: Option<i64>,
    #[serde(default)]
    pub last_pitch_cents: Option<f64>,
    #[serde(default)]
    pub last_tempo_bpm: Option<f64>,
    #[serde(default)]
    pub last_confidence: Option<f64>,
}

/// Calibration constants (stored as JSON under `calibration_tuning`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTuning {
    /// Minimum detector confidence for a frame to be learned from
    pub min_confidence: f64,
    /// Observations are clipped to these before averaging
    pub pitch_observation_limit_cents: f64,
    pub rhythm_observation_limit_ms: f64,
    /// Bias bounds while sampling
    pub pitch_bias_limit_cents: f64,
    pub rhythm_bias_limit_ms: f64,
    /// Tighter bounds applied to a profile read back from storage
    pub loaded_pitch_bias_limit_cents: f64,
    pub loaded_rhythm_bias_limit_ms: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for CalibrationTuning {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            pitch_observation_limit_cents: 30.0,
            rhythm_observation_limit_ms: 180.0,
            pitch_bias_limit_cents: 24.0,
            rhythm_bias_limit_ms: 150.0,
            loaded_pitch_bias_limit_cents: 18.0,
            loaded_rhythm_bias_limit_ms: 120.0,
            min_weight: 0.02,
            max_weight: 0.14,
        }
    }
}

/// Exponential moving average step for one bias value
///
/// The base weight is `1/(n+1)`, clamped so early samples cannot jump the
/// bias and late samples still move it, then scaled by frame confidence.
pub fn ema_bias(
    current_bias: f64,
    sample_count: u64,
    observation: f64,
    confidence: f64,
    tuning: &CalibrationTuning,
) -> f64 {
    let base = 1.0 / (sample_count as f64 + 1.0);
    let weight = base.clamp(tuning.min_weight, tuning.max_weight) * confidence.clamp(0.0, 1.0);
    current_bias + (observation - current_bias) * weight
}

fn bounded(value: f64, limit: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-limit, limit)
    } else {
        0.0
    }
}

/// Session-scoped calibration model with throttled persistence bookkeeping
#[derive(Debug, Clone)]
pub struct Calibrator {
    profile: CalibrationProfile,
    tuning: CalibrationTuning,
    persist_interval_ms: u64,
    dirty: bool,
    last_persist_at: i64,
    /// Stored profile has been read (or is known to be absent)
    baseline_loaded: bool,
}

impl Calibrator {
    /// Seed from a stored profile, clamping it to the load bounds
    pub fn from_loaded(
        loaded: CalibrationProfile,
        tuning: CalibrationTuning,
        persist_interval_ms: u64,
        now_ms: i64,
    ) -> Self {
        Self {
            profile: Self::seed(loaded, &tuning),
            tuning,
            persist_interval_ms,
            dirty: false,
            last_persist_at: now_ms,
            baseline_loaded: true,
        }
    }

    /// Start from defaults because the stored profile could not be read
    ///
    /// Saves are held back until `adopt_baseline` succeeds, so a failed read
    /// never overwrites what is on disk.
    pub fn without_baseline(tuning: CalibrationTuning, persist_interval_ms: u64, now_ms: i64) -> Self {
        Self {
            baseline_loaded: false,
            ..Self::from_loaded(CalibrationProfile::default(), tuning, persist_interval_ms, now_ms)
        }
    }

    fn seed(loaded: CalibrationProfile, tuning: &CalibrationTuning) -> CalibrationProfile {
        CalibrationProfile {
            pitch_bias_cents: bounded(loaded.pitch_bias_cents, tuning.loaded_pitch_bias_limit_cents),
            rhythm_bias_ms: bounded(loaded.rhythm_bias_ms, tuning.loaded_rhythm_bias_limit_ms),
            ..loaded
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline_loaded
    }

    /// A late read of the stored profile succeeded
    ///
    /// A stored profile replaces whatever this session learned without it;
    /// an absent one keeps the session's samples.
    pub fn adopt_baseline(&mut self, stored: Option<CalibrationProfile>) {
        if let Some(stored) = stored {
            self.profile = Self::seed(stored, &self.tuning);
            self.dirty = false;
        }
        self.baseline_loaded = true;
    }

    pub fn profile(&self) -> CalibrationProfile {
        self.profile
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_eligible(&self, frame: &FeatureFrame) -> bool {
        frame.has_signal && frame.confidence >= self.tuning.min_confidence
    }

    /// Fold one raw frame into the profile; returns false for ineligible frames
    pub fn observe(&mut self, frame: &FeatureFrame) -> bool {
        if !self.is_eligible(frame) {
            return false;
        }

        let t = &self.tuning;
        let pitch = bounded(frame.pitch_cents, t.pitch_observation_limit_cents);
        let rhythm = bounded(frame.rhythm_offset_ms, t.rhythm_observation_limit_ms);
        let n = self.profile.sample_count;

        self.profile.pitch_bias_cents = bounded(
            ema_bias(self.profile.pitch_bias_cents, n, pitch, frame.confidence, t),
            t.pitch_bias_limit_cents,
        );
        self.profile.rhythm_bias_ms = bounded(
            ema_bias(self.profile.rhythm_bias_ms, n, rhythm, frame.confidence, t),
            t.rhythm_bias_limit_ms,
        );
        self.profile.sample_count = n.saturating_add(1);
        self.profile.last_pitch_cents = Some(frame.pitch_cents);
        self.profile.last_tempo_bpm = Some(frame.tempo_bpm);
        self.profile.last_confidence = Some(frame.confidence);
        self.dirty = true;
        true
    }

    fn throttle_elapsed(&self, now_ms: i64) -> bool {
        now_ms - self.last_persist_at >= self.persist_interval_ms as i64
    }

    /// Hand out a snapshot to persist if the profile is dirty and the throttle window elapsed
    pub fn take_due_save(&mut self, now_ms: i64) -> Option<CalibrationProfile> {
        if !self.baseline_loaded || !self.dirty || !self.throttle_elapsed(now_ms) {
            return None;
        }
        self.dirty = false;
        self.last_persist_at = now_ms;
        Some(self.profile)
    }

    /// Whether to retry reading the stored profile; paced like saves
    pub fn take_due_reload(&mut self, now_ms: i64) -> bool {
        if self.baseline_loaded || !self.dirty || !self.throttle_elapsed(now_ms) {
            return false;
        }
        self.last_persist_at = now_ms;
        true
    }

    /// Snapshot for the stop flush, regardless of the throttle
    ///
    /// None while the stored profile is still unread.
    pub fn take_final_save(&mut self, now_ms: i64) -> Option<CalibrationProfile> {
        if !self.baseline_loaded {
            return None;
        }
        self.dirty = false;
        self.last_persist_at = now_ms;
        self.profile.last_session_at = Some(now_ms);
        Some(self.profile)
    }

    /// A save failed; try again on a later frame
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pitch_cents: f64, rhythm_offset_ms: f64, confidence: f64) -> FeatureFrame {
        FeatureFrame {
            frequency_hz: 440.0,
            note: "A4".to_string(),
            pitch_cents,
            tempo_bpm: 80.0,
            rhythm_offset_ms,
            onset: true,
            confidence,
            has_signal: true,
            timestamp_ms: 0,
        }
    }

    fn calibrator() -> Calibrator {
        Calibrator::from_loaded(CalibrationProfile::default(), CalibrationTuning::default(), 1000, 0)
    }

    #[test]
    fn test_ema_weight_is_clamped() {
        let t = CalibrationTuning::default();
        // n = 0 would give weight 1.0; clamped to 0.14
        assert!((ema_bias(0.0, 0, 10.0, 1.0, &t) - 1.4).abs() < 1e-9);
        // n = 1000 would give ~0.001; clamped to 0.02
        assert!((ema_bias(0.0, 1000, 10.0, 1.0, &t) - 0.2).abs() < 1e-9);
        // Confidence scales the step
        assert!((ema_bias(0.0, 0, 10.0, 0.5, &t) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_ema_converges_toward_observation() {
        let t = CalibrationTuning::default();
        let mut bias = 0.0;
        for n in 0..200 {
            bias = ema_bias(bias, n, 10.0, 1.0, &t);
        }
        assert!(bias > 9.0 && bias <= 10.0);
    }

    #[test]
    fn test_low_confidence_and_silent_frames_are_ignored() {
        let mut c = calibrator();
        assert!(!c.observe(&frame(10.0, 0.0, 0.59)));
        let mut silent = frame(10.0, 0.0, 0.9);
        silent.has_signal = false;
        assert!(!c.observe(&silent));
        assert_eq!(c.profile().sample_count, 0);
        assert!(!c.is_dirty());
    }

    #[test]
    fn test_biases_stay_bounded_and_count_only_grows() {
        let mut c = calibrator();
        let mut last_count = 0;
        for i in 0..500 {
            let sign = if i % 7 == 0 { -1.0 } else { 1.0 };
            c.observe(&frame(sign * 500.0, sign * 900.0, 1.0));
            let p = c.profile();
            assert!(p.pitch_bias_cents.abs() <= 24.0);
            assert!(p.rhythm_bias_ms.abs() <= 150.0);
            assert!(p.sample_count > last_count);
            last_count = p.sample_count;
        }
    }

    #[test]
    fn test_loaded_profile_is_clamped_to_load_bounds() {
        let loaded = CalibrationProfile {
            pitch_bias_cents: -40.0,
            rhythm_bias_ms: f64::NAN,
            sample_count: 12,
            ..Default::default()
        };
        let c = Calibrator::from_loaded(loaded, CalibrationTuning::default(), 1000, 0);
        assert_eq!(c.profile().pitch_bias_cents, -18.0);
        assert_eq!(c.profile().rhythm_bias_ms, 0.0);
        assert_eq!(c.profile().sample_count, 12);
    }

    #[test]
    fn test_save_is_throttled() {
        let mut c = calibrator();
        c.observe(&frame(5.0, 0.0, 0.9));
        assert!(c.take_due_save(500).is_none());
        assert!(c.take_due_save(1000).is_some());

        c.observe(&frame(5.0, 0.0, 0.9));
        assert!(c.take_due_save(1500).is_none());
        assert!(c.take_due_save(2000).is_some());

        // Clean profile never saves
        assert!(c.take_due_save(9000).is_none());
    }

    #[test]
    fn test_failed_save_is_retried() {
        let mut c = calibrator();
        c.observe(&frame(5.0, 0.0, 0.9));
        assert!(c.take_due_save(1000).is_some());
        c.mark_dirty();
        assert!(c.take_due_save(2000).is_some());
    }

    #[test]
    fn test_last_frame_details_are_recorded() {
        let mut c = calibrator();
        c.observe(&frame(4.0, 0.0, 0.8));
        let p = c.profile();
        assert_eq!(p.last_pitch_cents, Some(4.0));
        assert_eq!(p.last_tempo_bpm, Some(80.0));
        assert_eq!(p.last_confidence, Some(0.8));
        assert_eq!(p.last_session_at, None);

        let saved = c.take_final_save(7000).unwrap();
        assert_eq!(saved.last_session_at, Some(7000));
    }

    #[test]
    fn test_unread_baseline_is_never_saved() {
        let mut c = Calibrator::without_baseline(CalibrationTuning::default(), 1000, 0);
        c.observe(&frame(5.0, 0.0, 0.9));
        assert!(c.take_due_save(5000).is_none());
        assert!(c.take_final_save(5000).is_none());
    }

    #[test]
    fn test_reload_is_paced_and_stops_once_adopted() {
        let mut c = Calibrator::without_baseline(CalibrationTuning::default(), 1000, 0);
        // Nothing learned yet, nothing to protect
        assert!(!c.take_due_reload(1000));

        c.observe(&frame(5.0, 0.0, 0.9));
        assert!(!c.take_due_reload(500));
        assert!(c.take_due_reload(1000));
        assert!(!c.take_due_reload(1500));

        c.adopt_baseline(Some(CalibrationProfile {
            pitch_bias_cents: 30.0,
            sample_count: 5000,
            ..Default::default()
        }));
        assert!(!c.take_due_reload(5000));
        assert_eq!(c.profile().pitch_bias_cents, 18.0);
        assert_eq!(c.profile().sample_count, 5000);
        assert!(c.take_final_save(6000).is_some());
    }

    #[test]
    fn test_absent_baseline_keeps_session_samples() {
        let mut c = Calibrator::without_baseline(CalibrationTuning::default(), 1000, 0);
        c.observe(&frame(5.0, 0.0, 0.9));
        c.adopt_baseline(None);
        assert_eq!(c.profile().sample_count, 1);
        assert!(c.take_due_save(1000).is_some());
    }
}

//! Session quality metrics
//!
//! Tracks cue latency (frame capture to dispatch), false corrections and how
//! often evaluation ran on the synchronous fallback. Snapshots are produced
//! periodically and once more at stop, never per frame.

use ppc_common::contracts::{ConfidenceBand, CueState};
use ppc_common::events::{CueDecision, QualitySnapshot};
use std::collections::VecDeque;

/// Quality tracking parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityConfig {
    /// Number of most recent cue latencies kept for the percentile
    pub window: usize,
    pub snapshot_interval_ms: u64,
    /// Cues required before any snapshot is emitted
    pub min_samples: u64,
    /// Direction reversals closer than this count as false corrections
    pub false_correction_window_ms: i64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            window: 300,
            snapshot_interval_ms: 30_000,
            min_samples: 10,
            false_correction_window_ms: 2200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityTracker {
    config: QualityConfig,
    latencies: VecDeque<f64>,
    cue_count: u64,
    corrections: u64,
    false_corrections: u64,
    last_correction: Option<(CueState, i64)>,
    evaluations: u64,
    fallback_evaluations: u64,
    last_snapshot_at: i64,
}

impl QualityTracker {
    pub fn new(config: QualityConfig, started_at: i64) -> Self {
        Self {
            config,
            latencies: VecDeque::with_capacity(config.window.max(1)),
            cue_count: 0,
            corrections: 0,
            false_corrections: 0,
            last_correction: None,
            evaluations: 0,
            fallback_evaluations: 0,
            last_snapshot_at: started_at,
        }
    }

    pub fn cue_count(&self) -> u64 {
        self.cue_count
    }

    /// Count one completed evaluation
    pub fn record_evaluation(&mut self, on_fallback: bool) {
        self.evaluations += 1;
        if on_fallback {
            self.fallback_evaluations += 1;
        }
    }

    /// Record a dispatched cue for a frame captured at `captured_at`
    pub fn record_cue(&mut self, cue: &CueDecision, captured_at: i64, dispatched_at: i64) {
        self.cue_count += 1;
        if self.latencies.len() >= self.config.window.max(1) {
            self.latencies.pop_front();
        }
        self.latencies.push_back((dispatched_at - captured_at).max(0) as f64);

        if cue.state.is_correction() && cue.confidence_band == ConfidenceBand::High {
            self.corrections += 1;
            if let Some((previous, at)) = self.last_correction {
                if previous != cue.state
                    && cue.issued_at - at <= self.config.false_correction_window_ms
                {
                    self.false_corrections += 1;
                }
            }
            self.last_correction = Some((cue.state, cue.issued_at));
        }
    }

    /// Nearest-rank 95th percentile of the latency window
    pub fn p95_latency_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.latencies.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let rank = ((sorted.len() as f64) * 0.95).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    pub fn false_correction_rate(&self) -> f64 {
        ratio(self.false_corrections, self.corrections)
    }

    pub fn fallback_rate(&self) -> f64 {
        ratio(self.fallback_evaluations, self.evaluations)
    }

    pub fn snapshot(&self, session_id: &str, now_ms: i64) -> QualitySnapshot {
        QualitySnapshot {
            session_id: session_id.to_string(),
            p95_cue_latency_ms: self.p95_latency_ms(),
            false_correction_rate: self.false_correction_rate(),
            fallback_rate: self.fallback_rate(),
            sample_count: self.cue_count,
            at: now_ms,
        }
    }

    /// Periodic snapshot once enough cues were seen and the interval elapsed
    pub fn take_periodic(&mut self, session_id: &str, now_ms: i64) -> Option<QualitySnapshot> {
        if self.cue_count < self.config.min_samples
            || now_ms - self.last_snapshot_at < self.config.snapshot_interval_ms as i64
        {
            return None;
        }
        self.last_snapshot_at = now_ms;
        Some(self.snapshot(session_id, now_ms))
    }

    /// Final snapshot at stop, if the session gathered enough data
    pub fn take_final(&mut self, session_id: &str, now_ms: i64) -> Option<QualitySnapshot> {
        if self.cue_count < self.config.min_samples {
            return None;
        }
        self.last_snapshot_at = now_ms;
        Some(self.snapshot(session_id, now_ms))
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

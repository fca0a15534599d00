//! Feature frames and the capture seam
//!
//! The acoustic extractor lives outside this crate. It pushes `FeatureFrame`s
//! at tens of Hz into whatever `FeatureSource` the controller was built with.
//! `ChannelFeatureSource` is the in-process implementation used by the HTTP
//! push endpoint and by tests.

use async_trait::async_trait;
use ppc_common::events::FeatureSummary;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::realtime::calibration::CalibrationProfile;

/// One analysis frame produced by the feature extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    #[serde(default)]
    pub frequency_hz: f64,
    #[serde(default)]
    pub note: String,
    /// Signed pitch deviation from the nearest target note
    #[serde(default)]
    pub pitch_cents: f64,
    #[serde(default)]
    pub tempo_bpm: f64,
    /// Signed timing deviation from the expected beat (positive = late)
    #[serde(default)]
    pub rhythm_offset_ms: f64,
    #[serde(default)]
    pub onset: bool,
    /// Detector confidence, 0..1
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub has_signal: bool,
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl FeatureFrame {
    /// Replace non-finite readings with zero and clamp confidence to 0..1
    pub fn sanitized(mut self) -> Self {
        self.frequency_hz = finite_or_zero(self.frequency_hz);
        self.pitch_cents = finite_or_zero(self.pitch_cents);
        self.tempo_bpm = finite_or_zero(self.tempo_bpm);
        self.rhythm_offset_ms = finite_or_zero(self.rhythm_offset_ms);
        self.confidence = finite_or_zero(self.confidence).clamp(0.0, 1.0);
        self
    }

    /// Subtract the performer's learned bias so the policy sees relative error
    pub fn corrected(&self, profile: &CalibrationProfile) -> Self {
        let mut frame = self.clone();
        frame.pitch_cents -= profile.pitch_bias_cents;
        frame.rhythm_offset_ms -= profile.rhythm_bias_ms;
        frame
    }

    pub fn summary(&self) -> FeatureSummary {
        FeatureSummary {
            frequency_hz: self.frequency_hz,
            note: self.note.clone(),
            pitch_cents: self.pitch_cents,
            tempo_bpm: self.tempo_bpm,
            confidence: self.confidence,
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Control handle for an acquired capture stream
///
/// `release` must tolerate being called more than once.
pub trait CaptureHandle: Send + Sync {
    /// Stop delivering frames but keep the device warm
    fn suspend(&self);
    fn resume(&self);
    fn release(&self);
}

/// An acquired stream of frames plus its control handle
pub struct CaptureStream {
    pub frames: mpsc::Receiver<FeatureFrame>,
    pub handle: Box<dyn CaptureHandle>,
}

/// Something that can hand the controller a live frame stream
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Acquire capture; fails with `CaptureUnavailable` on denied permission or missing device
    async fn acquire(&self) -> Result<CaptureStream>;
}

/// Outcome of pushing a frame into a `ChannelFeatureSource`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushOutcome {
    Accepted,
    /// Consumer is behind; frames are droppable
    Dropped,
    Suspended,
    NoCapture,
}

struct ChannelInner {
    buffer: usize,
    available: AtomicBool,
    suspended: AtomicBool,
    next_epoch: AtomicU64,
    current: Mutex<Option<(u64, mpsc::Sender<FeatureFrame>)>>,
}

/// Push-driven feature source backed by a bounded tokio channel
#[derive(Clone)]
pub struct ChannelFeatureSource {
    inner: Arc<ChannelInner>,
}

impl ChannelFeatureSource {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                buffer: buffer.max(1),
                available: AtomicBool::new(true),
                suspended: AtomicBool::new(false),
                next_epoch: AtomicU64::new(1),
                current: Mutex::new(None),
            }),
        }
    }

    /// Simulate a capture device appearing or disappearing
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn is_capturing(&self) -> bool {
        self.inner
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Deliver one frame to the current capture stream, if any
    pub fn push(&self, frame: FeatureFrame) -> PushOutcome {
        let current = self.inner.current.lock().unwrap_or_else(PoisonError::into_inner);
        let Some((_, tx)) = current.as_ref() else {
            return PushOutcome::NoCapture;
        };
        if self.inner.suspended.load(Ordering::SeqCst) {
            return PushOutcome::Suspended;
        }
        match tx.try_send(frame) {
            Ok(()) => PushOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Feature frame dropped (consumer behind)");
                PushOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::NoCapture,
        }
    }
}

#[async_trait]
impl FeatureSource for ChannelFeatureSource {
    async fn acquire(&self) -> Result<CaptureStream> {
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(Error::CaptureUnavailable(
                "no feature capture device available".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst);
        *self.inner.current.lock().unwrap_or_else(PoisonError::into_inner) = Some((epoch, tx));
        self.inner.suspended.store(false, Ordering::SeqCst);
        info!("Feature capture acquired (epoch {})", epoch);

        Ok(CaptureStream {
            frames: rx,
            handle: Box::new(ChannelCaptureHandle {
                inner: Arc::clone(&self.inner),
                epoch,
                released: AtomicBool::new(false),
            }),
        })
    }
}

struct ChannelCaptureHandle {
    inner: Arc<ChannelInner>,
    epoch: u64,
    released: AtomicBool,
}

impl ChannelCaptureHandle {
    fn owns_current(&self) -> bool {
        matches!(
            self.inner.current.lock().unwrap_or_else(PoisonError::into_inner).as_ref(),
            Some((epoch, _)) if *epoch == self.epoch
        )
    }
}

impl CaptureHandle for ChannelCaptureHandle {
    fn suspend(&self) {
        if self.owns_current() {
            self.inner.suspended.store(true, Ordering::SeqCst);
        }
    }

    fn resume(&self) {
        if self.owns_current() {
            self.inner.suspended.store(false, Ordering::SeqCst);
        }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut current = self.inner.current.lock().unwrap_or_else(PoisonError::into_inner);
        // A newer acquire owns the channel now; leave it alone
        if matches!(current.as_ref(), Some((epoch, _)) if *epoch == self.epoch) {
            *current = None;
            self.inner.suspended.store(false, Ordering::SeqCst);
            info!("Feature capture released (epoch {})", self.epoch);
        }
    }
}

//! Test doubles for ppc-rt integration tests
//!
//! - ManualClock: deterministic millisecond clock
//! - In-memory stores recording every call
//! - Evaluator factories that hold, fail or break evaluations
//! - Harness: a controller wired to all of the above

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ppc_common::contracts::ParentPreset;
use ppc_common::events::{EventKind, EventRecord, RealtimeEvent};
use ppc_common::time::Clock;
use tokio::sync::{broadcast, Semaphore};

use ppc_rt::config::RuntimeSettings;
use ppc_rt::realtime::offload::{EvalRequest, EvalResponse, InlineEvaluator};
use ppc_rt::realtime::{
    CalibrationProfile, CalibrationStore, ChannelFeatureSource, ControllerDeps, EvaluatorFactory,
    EventLog, FeatureFrame, OffloadMode, PolicyEvaluator, PolicyState, PolicyTuning, PresetStore,
    SessionController,
};
use ppc_rt::{Error, Result, SharedState};

// ============================================================================
// Clock
// ============================================================================

pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Default)]
pub struct MemoryCalibrationStore {
    pub stored: Mutex<Option<CalibrationProfile>>,
    pub saves: Mutex<Vec<CalibrationProfile>>,
    pub fail_saves: AtomicBool,
    pub fail_loads: AtomicBool,
    /// When set, each save waits for a permit before it lands
    pub save_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MemoryCalibrationStore {
    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// Hold every following save until permits are added to the returned gate
    pub fn hold_saves(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.save_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl CalibrationStore for MemoryCalibrationStore {
    async fn load(&self) -> Result<Option<CalibrationProfile>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(Error::Persistence("database is locked".to_string()));
        }
        Ok(*self.stored.lock().unwrap())
    }

    async fn save(&self, profile: &CalibrationProfile) -> Result<()> {
        let gate = self.save_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Persistence("gate closed".to_string()))?
                .forget();
        }
        self.saves.lock().unwrap().push(*profile);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Persistence("storage full".to_string()));
        }
        *self.stored.lock().unwrap() = Some(*profile);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPresetStore {
    pub stored: Mutex<Option<ParentPreset>>,
}

#[async_trait]
impl PresetStore for MemoryPresetStore {
    async fn load_preset(&self) -> Result<Option<ParentPreset>> {
        Ok(*self.stored.lock().unwrap())
    }

    async fn save_preset(&self, preset: ParentPreset) -> Result<()> {
        *self.stored.lock().unwrap() = Some(preset);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventLog {
    pub records: Mutex<Vec<EventRecord>>,
}

impl RecordingEventLog {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.records.lock().unwrap().iter().map(|r| r.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl EventLog for RecordingEventLog {
    async fn append(&self, record: &EventRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Evaluators
// ============================================================================

/// Evaluator that blocks every request until a permit is released
pub struct GatedEvaluator {
    inline: InlineEvaluator,
    gate: Arc<Semaphore>,
    requests: Arc<Mutex<Vec<EvalRequest>>>,
}

#[async_trait]
impl PolicyEvaluator for GatedEvaluator {
    fn mode(&self) -> OffloadMode {
        OffloadMode::Worker
    }

    async fn evaluate(&self, request: EvalRequest) -> Result<EvalResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::WorkerUnavailable("gate closed".to_string()))?;
        permit.forget();
        self.inline.evaluate(request).await
    }

    async fn apply_preset(&self, policy: PolicyState, preset: ParentPreset) -> Result<PolicyState> {
        self.inline.apply_preset(policy, preset).await
    }

    fn shutdown(&self) {}
}

pub struct GatedFactory {
    pub gate: Arc<Semaphore>,
    pub requests: Arc<Mutex<Vec<EvalRequest>>>,
}

impl GatedFactory {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<EvalRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl EvaluatorFactory for GatedFactory {
    fn create(&self, tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>> {
        Ok(Arc::new(GatedEvaluator {
            inline: InlineEvaluator::new(tuning.clone()),
            gate: Arc::clone(&self.gate),
            requests: Arc::clone(&self.requests),
        }))
    }
}

/// Worker that reports itself gone on every call
pub struct BrokenWorker;

#[async_trait]
impl PolicyEvaluator for BrokenWorker {
    fn mode(&self) -> OffloadMode {
        OffloadMode::Worker
    }

    async fn evaluate(&self, _request: EvalRequest) -> Result<EvalResponse> {
        Err(Error::WorkerUnavailable("worker crashed".to_string()))
    }

    async fn apply_preset(&self, _policy: PolicyState, _preset: ParentPreset) -> Result<PolicyState> {
        Err(Error::WorkerUnavailable("worker crashed".to_string()))
    }

    fn shutdown(&self) {}
}

pub struct BrokenWorkerFactory;

impl EvaluatorFactory for BrokenWorkerFactory {
    fn create(&self, _tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>> {
        Ok(Arc::new(BrokenWorker))
    }
}

/// Worker cannot even be spawned
pub struct UnavailableFactory;

impl EvaluatorFactory for UnavailableFactory {
    fn create(&self, _tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>> {
        Err(Error::WorkerUnavailable("no worker support".to_string()))
    }
}

pub struct InlineFactory;

impl EvaluatorFactory for InlineFactory {
    fn create(&self, tuning: &PolicyTuning) -> Result<Arc<dyn PolicyEvaluator>> {
        Ok(Arc::new(InlineEvaluator::new(tuning.clone())))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub features: ChannelFeatureSource,
    pub clock: Arc<ManualClock>,
    pub calibration: Arc<MemoryCalibrationStore>,
    pub presets: Arc<MemoryPresetStore>,
    pub log: Arc<RecordingEventLog>,
    pub events: broadcast::Receiver<RealtimeEvent>,
}

impl Harness {
    pub fn new(evaluators: Arc<dyn EvaluatorFactory>) -> Self {
        Self::with_settings(evaluators, RuntimeSettings::default())
    }

    pub fn inline() -> Self {
        Self::new(Arc::new(InlineFactory))
    }

    pub fn with_settings(evaluators: Arc<dyn EvaluatorFactory>, settings: RuntimeSettings) -> Self {
        let features = ChannelFeatureSource::new(settings.capture_frame_buffer);
        let clock = Arc::new(ManualClock::new(1_000_000));
        let calibration = Arc::new(MemoryCalibrationStore::default());
        let presets = Arc::new(MemoryPresetStore::default());
        let log = Arc::new(RecordingEventLog::default());

        let deps = ControllerDeps {
            features: Arc::new(features.clone()),
            calibration_store: calibration.clone(),
            preset_store: presets.clone(),
            event_log: log.clone(),
            evaluators,
            clock: clock.clone(),
        };
        let shared = Arc::new(SharedState::new());
        let events = shared.subscribe_events();
        let controller = SessionController::new(deps, settings, shared);

        Self {
            controller,
            features,
            clock,
            calibration,
            presets,
            log,
            events,
        }
    }

    /// Everything broadcast so far
    pub fn drain_events(&mut self) -> Vec<RealtimeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    /// Ingest a frame, then let spawned evaluations finish
    pub async fn feed(&self, frame: FeatureFrame) {
        self.controller.ingest_frame(frame).await;
        settle().await;
    }
}

/// Let spawned tasks run to completion
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub fn frame(pitch_cents: f64, rhythm_offset_ms: f64, confidence: f64) -> FeatureFrame {
    FeatureFrame {
        frequency_hz: 440.0,
        note: "A4".to_string(),
        pitch_cents,
        tempo_bpm: 90.0,
        rhythm_offset_ms,
        onset: true,
        confidence,
        has_signal: true,
        timestamp_ms: 0,
    }
}

pub fn silence() -> FeatureFrame {
    FeatureFrame {
        has_signal: false,
        confidence: 0.0,
        ..frame(0.0, 0.0, 0.0)
    }
}

pub fn cues(events: &[RealtimeEvent]) -> Vec<ppc_common::events::CueDecision> {
    events
        .iter()
        .filter_map(|e| match e {
            RealtimeEvent::Cue(cue) => Some(cue.clone()),
            _ => None,
        })
        .collect()
}

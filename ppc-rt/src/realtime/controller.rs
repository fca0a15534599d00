//! Session controller
//!
//! Owns one practice session at a time: capture, calibration, policy state,
//! the evaluation offload and the single-slot mailbox in front of it.
//!
//! Locking: `runtime` is a std mutex and is never held across an await.
//! `lifecycle` is an async mutex that serializes start/pause/resume/stop and
//! preset changes against each other; frame ingestion and evaluation
//! completions never take it.
//!
//! Every session gets a fresh generation number. Evaluation completions carry
//! the generation and request id they were issued under and are ignored once
//! either no longer matches.
//!
//! Profile writes are numbered when their snapshot is taken and go through
//! `profile_writer`; a write older than the last one stored is dropped.

use ppc_common::contracts::{ConfidenceBand, CueState, ParentPreset};
use ppc_common::events::{CueDecision, FeatureSummary, RealtimeEvent, StatePayload};
use ppc_common::time::Clock;
use ppc_common::uuid_utils::generate_session_id;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeSettings;
use crate::error::{Error, Result};
use crate::realtime::calibration::{CalibrationProfile, Calibrator};
use crate::realtime::feature::{CaptureHandle, FeatureFrame, FeatureSource};
use crate::realtime::mailbox::{CoalescingMailbox, Offer};
use crate::realtime::navigation::{self, NavigationAction, NavigationSignal, SurfaceClassifier};
use crate::realtime::offload::{
    EvalRequest, EvalResponse, EvaluatorFactory, InlineEvaluator, OffloadMode, PolicyEvaluator,
};
use crate::realtime::policy::PolicyState;
use crate::realtime::quality::QualityTracker;
use crate::realtime::storage::{CalibrationStore, EventLog, PresetStore};
use crate::state::SharedState;

pub const STOP_REASON_MANUAL: &str = "manual-stop";
pub const FALLBACK_MODE_MANUAL_DRILL: &str = "manual-drill";
const DEFAULT_SOURCE_VIEW: &str = "unknown";
/// Frame timestamps older than this are not trusted as a latency origin
const MAX_FRAME_AGE_MS: i64 = 10_000;

/// Collaborators injected into the controller
#[derive(Clone)]
pub struct ControllerDeps {
    pub features: Arc<dyn FeatureSource>,
    pub calibration_store: Arc<dyn CalibrationStore>,
    pub preset_store: Arc<dyn PresetStore>,
    pub event_log: Arc<dyn EventLog>,
    pub evaluators: Arc<dyn EvaluatorFactory>,
    pub clock: Arc<dyn Clock>,
}

/// Externally observable session snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    pub active: bool,
    pub paused: bool,
    pub listening: bool,
    pub started_at: Option<i64>,
    pub stopped_at: Option<i64>,
    pub source_view: Option<String>,
    pub view_id: Option<String>,
    pub cue_state: CueState,
    pub confidence_band: ConfidenceBand,
    pub fallback_mode: Option<String>,
    pub offload_mode: Option<OffloadMode>,
    pub last_feature: Option<FeatureSummary>,
    pub last_cue: Option<CueDecision>,
    pub calibration: Option<CalibrationProfile>,
    pub policy: PolicyState,
}

/// Frame waiting for (or undergoing) evaluation
#[derive(Debug, Clone)]
struct PendingFrame {
    frame: FeatureFrame,
    /// Latency origin: capture timestamp, or receipt time when unusable
    captured_at: i64,
}

/// Everything a spawned evaluation task needs
struct EvalJob {
    generation: u64,
    request: EvalRequest,
    captured_at: i64,
    evaluator: Arc<dyn PolicyEvaluator>,
    on_fallback: bool,
}

struct Session {
    id: String,
    generation: u64,
    started_at: i64,
    source_view: String,
    paused: bool,
    listening: bool,
    calibrator: Calibrator,
    policy: PolicyState,
    evaluator: Arc<dyn PolicyEvaluator>,
    /// Worker failed; evaluations run inline and count as fallback
    fallback_active: bool,
    mailbox: CoalescingMailbox<PendingFrame>,
    quality: QualityTracker,
    cue_state: CueState,
    confidence_band: ConfidenceBand,
    fallback_mode: Option<String>,
    last_feature: Option<FeatureSummary>,
    last_cue: Option<CueDecision>,
    capture: Box<dyn CaptureHandle>,
    pump: Option<JoinHandle<()>>,
}

struct Runtime {
    session: Option<Session>,
    preset: ParentPreset,
    preset_revision: u64,
    view_id: Option<String>,
    last_session_id: Option<String>,
    last_stopped_at: Option<i64>,
    last_state_publish_at: Option<i64>,
}

struct Inner {
    deps: ControllerDeps,
    settings: RuntimeSettings,
    classifier: SurfaceClassifier,
    shared: Arc<SharedState>,
    lifecycle: tokio::sync::Mutex<()>,
    runtime: Mutex<Runtime>,
    next_request_id: AtomicU64,
    next_generation: AtomicU64,
    next_profile_write: AtomicU64,
    /// Sequence number of the last profile write that reached the store
    profile_writer: tokio::sync::Mutex<u64>,
}

/// Where cue latency is measured from
fn latency_origin(frame_timestamp_ms: i64, received_at: i64) -> i64 {
    let age = received_at - frame_timestamp_ms;
    if frame_timestamp_ms > 0 && (0..MAX_FRAME_AGE_MS).contains(&age) {
        frame_timestamp_ms
    } else {
        received_at
    }
}

/// Realtime coaching session controller
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(deps: ControllerDeps, settings: RuntimeSettings, shared: Arc<SharedState>) -> Self {
        Self::with_classifier(deps, settings, shared, SurfaceClassifier::default())
    }

    pub fn with_classifier(
        deps: ControllerDeps,
        settings: RuntimeSettings,
        shared: Arc<SharedState>,
        classifier: SurfaceClassifier,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                settings,
                classifier,
                shared,
                lifecycle: tokio::sync::Mutex::new(()),
                runtime: Mutex::new(Runtime {
                    session: None,
                    preset: ParentPreset::default(),
                    preset_revision: 0,
                    view_id: None,
                    last_session_id: None,
                    last_stopped_at: None,
                    last_state_publish_at: None,
                }),
                next_request_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                next_profile_write: AtomicU64::new(1),
                profile_writer: tokio::sync::Mutex::new(0),
            }),
        }
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.inner.shared
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.inner.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> i64 {
        self.inner.deps.clock.now_ms()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Current session snapshot; never fails
    pub fn get_session_state(&self) -> SessionState {
        let rt = self.lock();
        self.snapshot(&rt)
    }

    fn snapshot(&self, rt: &Runtime) -> SessionState {
        match &rt.session {
            Some(s) => SessionState {
                session_id: Some(s.id.clone()),
                active: true,
                paused: s.paused,
                listening: s.listening,
                started_at: Some(s.started_at),
                stopped_at: None,
                source_view: Some(s.source_view.clone()),
                view_id: rt.view_id.clone(),
                cue_state: s.cue_state,
                confidence_band: s.confidence_band,
                fallback_mode: s.fallback_mode.clone(),
                offload_mode: Some(s.evaluator.mode()),
                last_feature: s.last_feature.clone(),
                last_cue: s.last_cue.clone(),
                calibration: Some(s.calibrator.profile()),
                policy: s.policy.clone(),
            },
            None => SessionState {
                session_id: rt.last_session_id.clone(),
                active: false,
                paused: false,
                listening: false,
                started_at: None,
                stopped_at: rt.last_stopped_at,
                source_view: None,
                view_id: rt.view_id.clone(),
                cue_state: CueState::Listening,
                confidence_band: ConfidenceBand::Low,
                fallback_mode: None,
                offload_mode: None,
                last_feature: None,
                last_cue: None,
                calibration: None,
                policy: self.idle_policy(rt),
            },
        }
    }

    fn idle_policy(&self, rt: &Runtime) -> PolicyState {
        let mut policy = self.inner.settings.policy.initial_state(rt.preset);
        policy.preset_revision = rt.preset_revision;
        policy
    }

    /// Policy snapshot of the running session, or of the idle preset
    pub fn policy_snapshot(&self) -> PolicyState {
        let rt = self.lock();
        match &rt.session {
            Some(s) => s.policy.clone(),
            None => self.idle_policy(&rt),
        }
    }

    fn state_payload(rt: &Runtime, now: i64) -> Option<StatePayload> {
        match &rt.session {
            Some(s) => Some(StatePayload {
                session_id: s.id.clone(),
                listening: s.listening,
                paused: s.paused,
                confidence_band: s.confidence_band,
                cue_state: s.cue_state,
                view_id: rt.view_id.clone(),
                last_feature: s.last_feature.clone(),
                timestamp: now,
            }),
            None => rt.last_session_id.as_ref().map(|id| StatePayload {
                session_id: id.clone(),
                listening: false,
                paused: false,
                confidence_band: ConfidenceBand::Low,
                cue_state: CueState::Listening,
                view_id: rt.view_id.clone(),
                last_feature: None,
                timestamp: now,
            }),
        }
    }

    /// Throttled `state` publication; lifecycle transitions force it
    fn take_state_publish(&self, rt: &mut Runtime, now: i64, force: bool) -> Option<StatePayload> {
        let due = match rt.last_state_publish_at {
            Some(at) => now - at >= self.inner.settings.state_publish_throttle_ms as i64,
            None => true,
        };
        if !force && !due {
            return None;
        }
        let payload = Self::state_payload(rt, now)?;
        rt.last_state_publish_at = Some(now);
        Some(payload)
    }

    // ------------------------------------------------------------------
    // Event emission
    // ------------------------------------------------------------------

    /// Validate, persist (coarse kinds only) and broadcast one event
    async fn emit(&self, event: RealtimeEvent) {
        if let Err(e) = event.validate() {
            warn!("Blocked invalid realtime event: {}", e);
            self.inner.shared.increment_blocked_events();
            return;
        }

        // Per-frame state never reaches storage
        if event.kind().is_persistable() {
            match event.to_record() {
                Ok(record) => {
                    if let Err(e) = self.inner.deps.event_log.append(&record).await {
                        warn!("Failed to append {} event: {}", record.kind, e);
                    }
                }
                Err(e) => warn!("Failed to encode {} event: {}", event.kind(), e),
            }
        }

        if let RealtimeEvent::Quality(snapshot) = &event {
            self.inner.shared.set_latest_quality(snapshot.clone()).await;
        }

        trace!("Broadcasting realtime event: {}", event.kind());
        self.inner.shared.broadcast_event(event);
    }

    async fn emit_all(&self, events: Vec<RealtimeEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    async fn publish_state(&self, payload: Option<StatePayload>) {
        if let Some(payload) = payload {
            self.emit(RealtimeEvent::State(payload)).await;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start listening
    ///
    /// Re-entry while a session exists returns the current state. Fails only
    /// when capture cannot be acquired, in which case no session is created.
    pub async fn start_session(&self, source_view: Option<String>) -> Result<SessionState> {
        let _gate = self.inner.lifecycle.lock().await;

        if self.lock().session.is_some() {
            debug!("start_session: session already active");
            return Ok(self.get_session_state());
        }

        let deps = &self.inner.deps;
        let settings = &self.inner.settings;
        let session_id = generate_session_id();

        let stored_preset = match deps.preset_store.load_preset().await {
            Ok(preset) => preset,
            Err(e) => {
                warn!("Failed to load last preset: {}", e);
                None
            }
        };
        let stored_profile = match deps.calibration_store.load().await {
            Ok(profile) => Some(profile.unwrap_or_default()),
            Err(e) => {
                warn!("Failed to load calibration profile, holding writes until it can be read: {}", e);
                None
            }
        };

        let capture = match deps.features.acquire().await {
            Ok(capture) => capture,
            Err(e) => {
                let error = match e {
                    Error::CaptureUnavailable(msg) => Error::CaptureUnavailable(msg),
                    other => Error::CaptureUnavailable(other.to_string()),
                };
                warn!("Session start failed: {}", error);
                self.emit(RealtimeEvent::Fallback {
                    session_id,
                    reason: "mic-permission".to_string(),
                    mode: FALLBACK_MODE_MANUAL_DRILL.to_string(),
                    at: self.now(),
                })
                .await;
                return Err(error);
            }
        };

        let (evaluator, fallback_active): (Arc<dyn PolicyEvaluator>, bool) =
            match deps.evaluators.create(&settings.policy) {
                Ok(evaluator) => (evaluator, false),
                Err(e) => {
                    warn!("Evaluating inline for this session: {}", e);
                    (Arc::new(InlineEvaluator::new(settings.policy.clone())), true)
                }
            };

        let now = self.now();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let (started, publish) = {
            let mut rt = self.lock();
            if let Some(preset) = stored_preset {
                rt.preset = preset;
            }
            let mut policy = settings.policy.initial_state(rt.preset);
            policy.preset_revision = rt.preset_revision;
            let source_view = source_view
                .filter(|v| !v.trim().is_empty())
                .or_else(|| rt.view_id.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE_VIEW.to_string());

            rt.session = Some(Session {
                id: session_id.clone(),
                generation,
                started_at: now,
                source_view: source_view.clone(),
                paused: false,
                listening: true,
                calibrator: match stored_profile {
                    Some(profile) => Calibrator::from_loaded(
                        profile,
                        settings.calibration,
                        settings.profile_persist_interval_ms,
                        now,
                    ),
                    None => Calibrator::without_baseline(
                        settings.calibration,
                        settings.profile_persist_interval_ms,
                        now,
                    ),
                },
                policy,
                evaluator: Arc::clone(&evaluator),
                fallback_active,
                mailbox: CoalescingMailbox::new(),
                quality: QualityTracker::new(settings.quality, now),
                cue_state: CueState::Listening,
                confidence_band: ConfidenceBand::Low,
                fallback_mode: None,
                last_feature: None,
                last_cue: None,
                capture: capture.handle,
                pump: None,
            });
            rt.last_session_id = Some(session_id.clone());
            rt.last_stopped_at = None;

            let started = RealtimeEvent::SessionStarted {
                session_id: session_id.clone(),
                started_at: now,
                source_view,
            };
            (started, self.take_state_publish(&mut rt, now, true))
        };

        info!(
            "Session {} started (preset {}, offload {:?})",
            session_id,
            self.policy_snapshot().preset,
            evaluator.mode()
        );
        self.emit(started).await;
        self.publish_state(publish).await;

        let pump = self.spawn_pump(capture.frames);
        if let Some(session) = self.lock().session.as_mut() {
            session.pump = Some(pump);
        }

        Ok(self.get_session_state())
    }

    fn spawn_pump(&self, mut frames: mpsc::Receiver<FeatureFrame>) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                SessionController { inner }.ingest_frame(frame).await;
            }
            debug!("Capture stream ended");
        })
    }

    /// Stop cueing but keep the session (and capture device) alive
    pub async fn pause_session(&self) -> SessionState {
        let _gate = self.inner.lifecycle.lock().await;
        let now = self.now();
        let publish = {
            let mut rt = self.lock();
            match rt.session.as_mut() {
                Some(s) if !s.paused => {
                    s.paused = true;
                    s.listening = false;
                    s.mailbox.clear_pending();
                    s.capture.suspend();
                    info!("Session {} paused", s.id);
                    self.take_state_publish(&mut rt, now, true)
                }
                _ => None,
            }
        };
        self.publish_state(publish).await;
        self.get_session_state()
    }

    pub async fn resume_session(&self) -> SessionState {
        let _gate = self.inner.lifecycle.lock().await;
        let now = self.now();
        let publish = {
            let mut rt = self.lock();
            match rt.session.as_mut() {
                Some(s) if s.paused => {
                    s.paused = false;
                    s.listening = true;
                    s.capture.resume();
                    info!("Session {} resumed", s.id);
                    self.take_state_publish(&mut rt, now, true)
                }
                _ => None,
            }
        };
        self.publish_state(publish).await;
        self.get_session_state()
    }

    /// Single teardown path; safe to call at any time
    pub async fn stop_session(&self, reason: &str) -> SessionState {
        let _gate = self.inner.lifecycle.lock().await;
        self.teardown(reason).await
    }

    async fn teardown(&self, reason: &str) -> SessionState {
        let now = self.now();
        let taken = {
            let mut rt = self.lock();
            let taken = rt.session.take();
            if taken.is_some() {
                rt.last_stopped_at = Some(now);
            }
            taken
        };
        let Some(mut session) = taken else {
            return self.get_session_state();
        };

        if let Some(pump) = session.pump.take() {
            pump.abort();
        }
        session.capture.release();
        session.evaluator.shutdown();

        if !session.calibrator.has_baseline() {
            match self.inner.deps.calibration_store.load().await {
                Ok(stored) => session.calibrator.adopt_baseline(stored),
                Err(e) => warn!("Calibration profile still unreadable: {}", e),
            }
        }
        match session.calibrator.take_final_save(now) {
            Some(profile) => {
                let seq = self.inner.next_profile_write.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = self.write_profile(seq, &profile).await {
                    warn!("Failed to flush calibration profile: {}", e);
                }
            }
            None => warn!(
                "Session {} never read the stored profile; leaving it untouched",
                session.id
            ),
        }

        info!("Session {} stopped ({})", session.id, reason);
        self.emit(RealtimeEvent::SessionStopped {
            session_id: session.id.clone(),
            stopped_at: now,
            reason: reason.to_string(),
        })
        .await;
        if let Some(snapshot) = session.quality.take_final(&session.id, now) {
            self.emit(RealtimeEvent::Quality(snapshot)).await;
        }

        let publish = {
            let mut rt = self.lock();
            self.take_state_publish(&mut rt, now, true)
        };
        self.publish_state(publish).await;

        self.get_session_state()
    }

    /// Change the coaching preset (parent override)
    ///
    /// Applies to the running session, if any, and becomes the preset of
    /// future sessions.
    pub async fn set_parent_preset(&self, preset: ParentPreset, source: &str) -> PolicyState {
        let _gate = self.inner.lifecycle.lock().await;
        let tuning = &self.inner.settings.policy;

        let (previous, running) = {
            let rt = self.lock();
            let running = rt
                .session
                .as_ref()
                .map(|s| (s.generation, Arc::clone(&s.evaluator), s.policy.clone()));
            (rt.preset, running)
        };

        let rebound = match running {
            Some((generation, evaluator, policy)) => {
                let rebound = match evaluator.apply_preset(policy.clone(), preset).await {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("Preset apply via {:?} failed: {}", evaluator.mode(), e);
                        if matches!(e, Error::WorkerUnavailable(_)) {
                            self.switch_to_inline(generation);
                        }
                        tuning.apply_preset(&policy, preset)
                    }
                };
                Some((generation, rebound))
            }
            None => None,
        };

        let snapshot = {
            let mut rt = self.lock();
            rt.preset = preset;
            rt.preset_revision += 1;
            let revision = rt.preset_revision;
            let applied = match (rt.session.as_mut(), rebound) {
                (Some(s), Some((generation, rebound))) if s.generation == generation => {
                    s.policy = PolicyState {
                        preset: rebound.preset,
                        preset_revision: revision,
                        bounds: rebound.bounds,
                        rails: rebound.rails,
                        ..s.policy.clone()
                    };
                    Some(s.policy.clone())
                }
                _ => None,
            };
            applied.unwrap_or_else(|| self.idle_policy(&rt))
        };

        if let Err(e) = self.inner.deps.preset_store.save_preset(preset).await {
            warn!("Failed to persist preset: {}", e);
        }

        if previous != preset {
            info!("Parent preset changed {} -> {} ({})", previous, preset, source);
            self.emit(RealtimeEvent::ParentOverride {
                preset,
                previous_preset: previous,
                source: source.to_string(),
                at: self.now(),
            })
            .await;
        }

        snapshot
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// React to a navigation or lifecycle signal from the host
    pub async fn handle_navigation(&self, signal: NavigationSignal) -> SessionState {
        let (active, paused) = {
            let mut rt = self.lock();
            if let NavigationSignal::Surface { surface_id } = &signal {
                rt.view_id = Some(surface_id.clone());
            }
            match &rt.session {
                Some(s) => (true, s.paused),
                None => (false, false),
            }
        };

        match navigation::decide(&self.inner.classifier, &signal, active, paused) {
            NavigationAction::Pause => self.pause_session().await,
            NavigationAction::Resume => self.resume_session().await,
            NavigationAction::Stop(reason) => self.stop_session(reason).await,
            NavigationAction::Ignore => self.get_session_state(),
        }
    }

    /// Forward every signal from `signals` to `handle_navigation`
    pub fn subscribe_navigation(&self, mut signals: mpsc::Receiver<NavigationSignal>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                debug!("Navigation signal: {:?}", signal);
                controller.handle_navigation(signal).await;
            }
        })
    }

    // ------------------------------------------------------------------
    // Frame ingestion and evaluation
    // ------------------------------------------------------------------

    /// Process one frame from the feature source
    ///
    /// Ignored when no session is active or the session is paused.
    pub async fn ingest_frame(&self, frame: FeatureFrame) {
        let frame = frame.sanitized();
        let now = self.now();

        let (job, reload, save, publish) = {
            let mut rt = self.lock();
            let Some(session) = rt.session.as_mut() else {
                return;
            };
            if session.paused {
                return;
            }

            session.last_feature = Some(frame.summary());
            session.confidence_band = if frame.has_signal {
                ConfidenceBand::from_score(frame.confidence)
            } else {
                ConfidenceBand::Low
            };

            // Correct with the bias learned so far, then learn from the raw frame
            let pending = PendingFrame {
                frame: frame.corrected(&session.calibrator.profile()),
                captured_at: latency_origin(frame.timestamp_ms, now),
            };
            session.calibrator.observe(&frame);
            let generation = session.generation;
            let reload = session.calibrator.take_due_reload(now).then_some(generation);
            let save = session.calibrator.take_due_save(now).map(|profile| {
                let seq = self.inner.next_profile_write.fetch_add(1, Ordering::SeqCst);
                (generation, seq, profile)
            });

            let job = match session.mailbox.offer(pending) {
                Offer::Dispatch(pending) => Some(self.prepare_dispatch(session, pending)),
                Offer::Queued { replaced } => {
                    if replaced {
                        trace!("Coalesced pending frame");
                    }
                    None
                }
            };

            (job, reload, save, self.take_state_publish(&mut rt, now, false))
        };

        if let Some(job) = job {
            self.spawn_evaluation(job);
        }
        self.publish_state(publish).await;

        if let Some(generation) = reload {
            self.reload_calibration(generation).await;
        }
        if let Some((generation, seq, profile)) = save {
            self.spawn_profile_save(generation, seq, profile);
        }
    }

    /// Retry reading the stored profile after it failed at start
    async fn reload_calibration(&self, generation: u64) {
        match self.inner.deps.calibration_store.load().await {
            Ok(stored) => {
                let mut rt = self.lock();
                if let Some(s) = rt.session.as_mut().filter(|s| s.generation == generation) {
                    s.calibrator.adopt_baseline(stored);
                    info!("Session {} calibration profile loaded", s.id);
                }
            }
            Err(e) => debug!("Calibration profile still unreadable: {}", e),
        }
    }

    /// Throttled saves run detached so a cancelled pump cannot cut one short
    fn spawn_profile_save(&self, generation: u64, seq: u64, profile: CalibrationProfile) {
        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.write_profile(seq, &profile).await {
                warn!("Failed to persist calibration profile: {}", e);
                let mut rt = controller.lock();
                if let Some(s) = rt.session.as_mut().filter(|s| s.generation == generation) {
                    s.calibrator.mark_dirty();
                }
            }
        });
    }

    /// Store a profile snapshot unless a newer one already reached the store
    async fn write_profile(&self, seq: u64, profile: &CalibrationProfile) -> Result<()> {
        let mut last_written = self.inner.profile_writer.lock().await;
        if seq <= *last_written {
            debug!("Skipping superseded profile write {}", seq);
            return Ok(());
        }
        self.inner.deps.calibration_store.save(profile).await?;
        *last_written = seq;
        Ok(())
    }

    /// Allocate a request id and snapshot the policy for one dispatch
    fn prepare_dispatch(&self, session: &mut Session, pending: PendingFrame) -> EvalJob {
        let request_id = self.inner.next_request_id.fetch_add(1, Ordering::SeqCst);
        session.mailbox.begin(request_id);
        EvalJob {
            generation: session.generation,
            request: EvalRequest {
                request_id,
                frame: pending.frame,
                policy: session.policy.clone(),
                now_ms: self.now(),
            },
            captured_at: pending.captured_at,
            evaluator: Arc::clone(&session.evaluator),
            on_fallback: session.fallback_active,
        }
    }

    fn spawn_evaluation(&self, job: EvalJob) {
        let controller = self.clone();
        tokio::spawn(async move { controller.run_evaluation(job).await });
    }

    async fn run_evaluation(self, job: EvalJob) {
        let EvalJob {
            generation,
            request,
            captured_at,
            evaluator,
            mut on_fallback,
        } = job;
        let request_id = request.request_id;

        let mut outcome = evaluator.evaluate(request.clone()).await;
        let worker_failed = match &outcome {
            Err(Error::WorkerUnavailable(reason)) => {
                warn!("Policy worker unavailable ({}), evaluating inline", reason);
                true
            }
            _ => false,
        };
        if worker_failed {
            if let Some(inline) = self.switch_to_inline(generation) {
                outcome = inline.evaluate(request).await;
                on_fallback = true;
            }
        }

        self.complete_evaluation(generation, request_id, captured_at, on_fallback, outcome)
            .await;
    }

    /// Replace a failed worker with the inline evaluator for the rest of the session
    fn switch_to_inline(&self, generation: u64) -> Option<Arc<dyn PolicyEvaluator>> {
        let mut rt = self.lock();
        let session = rt.session.as_mut().filter(|s| s.generation == generation)?;
        if session.evaluator.mode() == OffloadMode::Worker {
            session.evaluator.shutdown();
            session.evaluator = Arc::new(InlineEvaluator::new(self.inner.settings.policy.clone()));
            session.fallback_active = true;
            info!("Session {} switched to inline evaluation", session.id);
        }
        Some(Arc::clone(&session.evaluator))
    }

    async fn complete_evaluation(
        &self,
        generation: u64,
        request_id: u64,
        captured_at: i64,
        on_fallback: bool,
        outcome: Result<EvalResponse>,
    ) {
        let now = self.now();
        let mut events = Vec::new();

        {
            let mut rt = self.lock();
            let Some(session) = rt.session.as_mut().filter(|s| s.generation == generation) else {
                debug!("Discarding evaluation {} for a finished session", request_id);
                return;
            };
            if !session.mailbox.is_current(request_id) {
                debug!("Discarding stale evaluation {}", request_id);
                return;
            }

            match outcome {
                Ok(response) if response.request_id != request_id => {
                    warn!(
                        "Evaluation reply id {} does not match request {}",
                        response.request_id, request_id
                    );
                }
                Ok(_) if session.paused => {
                    debug!("Discarding evaluation {} received while paused", request_id);
                }
                Ok(response) => {
                    session.quality.record_evaluation(on_fallback);

                    let mut policy = response.policy;
                    if policy.preset_revision != session.policy.preset_revision {
                        // Preset changed while this request was in flight
                        let revision = session.policy.preset_revision;
                        policy = self.inner.settings.policy.apply_preset(&policy, session.policy.preset);
                        policy.preset_revision = revision;
                    }
                    session.policy = policy;

                    if let Some(cue) = response.decision {
                        session.quality.record_cue(&cue, captured_at, now);
                        session.cue_state = cue.state;
                        session.last_cue = Some(cue.clone());
                        if cue.fallback {
                            session.fallback_mode = Some(FALLBACK_MODE_MANUAL_DRILL.to_string());
                            events.push(RealtimeEvent::Cue(cue.clone()));
                            events.push(RealtimeEvent::Fallback {
                                session_id: session.id.clone(),
                                reason: "low-confidence".to_string(),
                                mode: FALLBACK_MODE_MANUAL_DRILL.to_string(),
                                at: now,
                            });
                        } else {
                            events.push(RealtimeEvent::Cue(cue));
                        }
                        if let Some(snapshot) = session.quality.take_periodic(&session.id, now) {
                            events.push(RealtimeEvent::Quality(snapshot));
                        }
                    }
                }
                Err(Error::EvaluationTimeout(ms)) => {
                    warn!("Evaluation {} timed out after {} ms, dropping frame", request_id, ms);
                }
                Err(e) => {
                    warn!("Evaluation {} failed: {}", request_id, e);
                }
            }
        }

        // In-flight stays set until the cue is out, so dispatch order is completion order
        self.emit_all(events).await;

        let next = {
            let mut rt = self.lock();
            match rt.session.as_mut().filter(|s| s.generation == generation) {
                Some(session) => session
                    .mailbox
                    .complete(request_id)
                    .map(|pending| self.prepare_dispatch(session, pending)),
                None => None,
            }
        };
        if let Some(job) = next {
            self.spawn_evaluation(job);
        }
    }
}

//! HTTP request handlers
//!
//! Thin adapters from JSON requests onto `SessionController`. Lifecycle calls
//! are idempotent, so most of these never fail.

use axum::{
    extract::{Query, State},
    Json,
};
use ppc_common::contracts::ParentPreset;
use ppc_common::events::{EventKind, EventRecord, QualitySnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::api::server::AppContext;
use crate::error::{Error, Result};
use crate::realtime::controller::STOP_REASON_MANUAL;
use crate::realtime::feature::PushOutcome;
use crate::realtime::{FeatureFrame, NavigationSignal, PolicyState, SessionState};

const DEFAULT_LOG_LIMIT: u32 = 100;
const MAX_LOG_LIMIT: u32 = 1000;
const DEFAULT_PRESET_SOURCE: &str = "parent";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    session_active: bool,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    version: String,
    git_hash: String,
    build_timestamp: String,
    build_profile: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    source_view: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    preset: String,
    source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    outcome: PushOutcome,
}

#[derive(Debug, Deserialize)]
pub struct EventLogQuery {
    limit: Option<u32>,
    kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventLogResponse {
    events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct QualityResponse {
    quality: Option<QualitySnapshot>,
    blocked_events_total: u64,
}

// ============================================================================
// Service
// ============================================================================

/// GET /health
pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "ppc-rt".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        session_active: ctx.controller.get_session_state().active,
    })
}

/// GET /build_info
pub async fn get_build_info() -> Json<BuildInfo> {
    Json(BuildInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: env!("GIT_HASH").to_string(),
        build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
        build_profile: env!("BUILD_PROFILE").to_string(),
    })
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// GET /session
pub async fn get_session(State(ctx): State<AppContext>) -> Json<SessionState> {
    Json(ctx.controller.get_session_state())
}

/// POST /session/start
///
/// Body is optional. Fails with 503 when no capture device is available.
pub async fn start_session(
    State(ctx): State<AppContext>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<SessionState>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let state = ctx.controller.start_session(req.source_view).await?;
    Ok(Json(state))
}

/// POST /session/pause
pub async fn pause_session(State(ctx): State<AppContext>) -> Json<SessionState> {
    Json(ctx.controller.pause_session().await)
}

/// POST /session/resume
pub async fn resume_session(State(ctx): State<AppContext>) -> Json<SessionState> {
    Json(ctx.controller.resume_session().await)
}

/// POST /session/stop
pub async fn stop_session(
    State(ctx): State<AppContext>,
    body: Option<Json<StopRequest>>,
) -> Json<SessionState> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let reason = req
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| STOP_REASON_MANUAL.to_string());
    Json(ctx.controller.stop_session(&reason).await)
}

/// POST /navigation
pub async fn navigation(
    State(ctx): State<AppContext>,
    Json(signal): Json<NavigationSignal>,
) -> Json<SessionState> {
    debug!("Navigation signal: {:?}", signal);
    Json(ctx.controller.handle_navigation(signal).await)
}

// ============================================================================
// Policy
// ============================================================================

/// GET /policy
pub async fn get_policy(State(ctx): State<AppContext>) -> Json<PolicyState> {
    Json(ctx.controller.policy_snapshot())
}

/// POST /policy/preset
pub async fn set_preset(
    State(ctx): State<AppContext>,
    Json(req): Json<PresetRequest>,
) -> Result<Json<PolicyState>> {
    let preset: ParentPreset = req
        .preset
        .parse()
        .map_err(|_| Error::InvalidPreset(req.preset.clone()))?;
    let source = req.source.as_deref().unwrap_or(DEFAULT_PRESET_SOURCE);

    info!("Parent preset request: {} (source: {})", preset, source);
    Ok(Json(ctx.controller.set_parent_preset(preset, source).await))
}

// ============================================================================
// Feature Frames
// ============================================================================

/// POST /frames
///
/// Push one frame into the live capture stream. The outcome tells the
/// extractor whether anyone is listening.
pub async fn push_frame(
    State(ctx): State<AppContext>,
    Json(frame): Json<FeatureFrame>,
) -> Json<PushResponse> {
    Json(PushResponse {
        outcome: ctx.features.push(frame),
    })
}

// ============================================================================
// Event Log & Quality
// ============================================================================

/// GET /events/log?limit=N&kind=K
pub async fn get_event_log(
    State(ctx): State<AppContext>,
    Query(query): Query<EventLogQuery>,
) -> Result<Json<EventLogResponse>> {
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(
            EventKind::parse(raw)
                .ok_or_else(|| Error::BadRequest(format!("Unknown event kind: {}", raw)))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);

    let events = ctx.event_log.recent(limit, kind).await?;
    Ok(Json(EventLogResponse { events }))
}

/// GET /quality
///
/// Latest snapshot of this process, else the last one persisted.
pub async fn get_quality(State(ctx): State<AppContext>) -> Result<Json<QualityResponse>> {
    let shared = ctx.controller.shared();
    let quality = match shared.get_latest_quality().await {
        Some(snapshot) => Some(snapshot),
        None => ctx.event_log.latest_quality().await?,
    };
    Ok(Json(QualityResponse {
        quality,
        blocked_events_total: shared.get_blocked_events(),
    }))
}

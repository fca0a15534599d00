//! Integration tests for the ppc-rt HTTP API
//!
//! Full router over an in-memory database with inline evaluation.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use ppc_common::time::SystemClock;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use tower::util::ServiceExt;

use ppc_rt::api::{create_router, AppContext};
use ppc_rt::config::RuntimeSettings;
use ppc_rt::db::{SqliteCalibrationStore, SqliteEventLog, SqlitePresetStore};
use ppc_rt::realtime::{ChannelFeatureSource, ControllerDeps, DefaultEvaluatorFactory, SessionController};
use ppc_rt::SharedState;

struct TestApp {
    router: Router,
    features: ChannelFeatureSource,
}

async fn create_test_app() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    ppc_common::db::create_schema(&pool)
        .await
        .expect("Failed to initialize database schema");

    let settings = RuntimeSettings::default();
    let features = ChannelFeatureSource::new(settings.capture_frame_buffer);
    let event_log = SqliteEventLog::new(pool.clone(), settings.event_log_max_entries);
    let deps = ControllerDeps {
        features: Arc::new(features.clone()),
        calibration_store: Arc::new(SqliteCalibrationStore::new(pool.clone())),
        preset_store: Arc::new(SqlitePresetStore::new(pool.clone())),
        event_log: Arc::new(event_log.clone()),
        evaluators: Arc::new(DefaultEvaluatorFactory {
            worker_enabled: false,
            eval_timeout: Duration::from_millis(120),
            apply_timeout: Duration::from_millis(180),
        }),
        clock: Arc::new(SystemClock),
    };
    let controller = SessionController::new(deps, settings, Arc::new(SharedState::new()));

    let router = create_router(AppContext {
        controller,
        features: features.clone(),
        event_log,
        port: 0,
    });

    TestApp { router, features }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["module"], "ppc-rt");
    assert_eq!(json["session_active"], false);
}

#[tokio::test]
async fn test_build_info_endpoint() {
    let app = create_test_app().await;
    let (status, json) = send(&app, "GET", "/build_info", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["git_hash"].is_string());
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "POST", "/session/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["active"], true);
    assert_eq!(json["listening"], true);
    assert_eq!(json["offload_mode"], "inline");
    assert_eq!(json["source_view"], "unknown");

    let (_, json) = send(&app, "POST", "/session/pause", None).await;
    assert_eq!(json["paused"], true);

    let (_, json) = send(&app, "POST", "/session/resume", None).await;
    assert_eq!(json["paused"], false);

    let (status, json) = send(&app, "POST", "/session/stop", Some(json!({ "reason": "done" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["active"], false);

    let (_, json) = send(&app, "GET", "/events/log?kind=session-stopped", None).await;
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "session-stopped");
    assert_eq!(events[0]["detail"]["reason"], "done");
}

#[tokio::test]
async fn test_start_with_source_view() {
    let app = create_test_app().await;
    let (_, json) = send(
        &app,
        "POST",
        "/session/start",
        Some(json!({ "source_view": "view-tuner" })),
    )
    .await;
    assert_eq!(json["source_view"], "view-tuner");

    let (_, json) = send(&app, "GET", "/session", None).await;
    assert_eq!(json["active"], true);
    assert_eq!(json["source_view"], "view-tuner");
}

#[tokio::test]
async fn test_start_without_capture_is_unavailable() {
    let app = create_test_app().await;
    app.features.set_available(false);

    let (status, json) = send(&app, "POST", "/session/start", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "error");

    let (_, json) = send(&app, "GET", "/session", None).await;
    assert_eq!(json["active"], false);

    let (_, json) = send(&app, "GET", "/events/log", None).await;
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "fallback");
    assert_eq!(events[0]["detail"]["reason"], "mic-permission");
}

#[tokio::test]
async fn test_stop_defaults_to_manual_reason() {
    let app = create_test_app().await;
    send(&app, "POST", "/session/start", None).await;
    send(&app, "POST", "/session/stop", None).await;

    let (_, json) = send(&app, "GET", "/events/log?kind=session-stopped", None).await;
    assert_eq!(json["events"][0]["detail"]["reason"], "manual-stop");
}

#[tokio::test]
async fn test_navigation_endpoint() {
    let app = create_test_app().await;
    send(&app, "POST", "/session/start", None).await;

    let (status, json) = send(&app, "POST", "/navigation", Some(json!({ "signal": "hidden" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["paused"], true);

    let (_, json) = send(
        &app,
        "POST",
        "/navigation",
        Some(json!({ "signal": "surface", "surface_id": "view-coach" })),
    )
    .await;
    assert_eq!(json["paused"], false);
    assert_eq!(json["view_id"], "view-coach");

    let (_, json) = send(&app, "POST", "/navigation", Some(json!({ "signal": "teardown" }))).await;
    assert_eq!(json["active"], false);
}

#[tokio::test]
async fn test_navigation_rejects_unknown_signal() {
    let app = create_test_app().await;
    let (status, _) = send(&app, "POST", "/navigation", Some(json!({ "signal": "wander" }))).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_preset_endpoint() {
    let app = create_test_app().await;

    let (status, json) = send(&app, "POST", "/policy/preset", Some(json!({ "preset": "gentle" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["preset"], "gentle");
    assert_eq!(json["preset_revision"], 1);

    let (_, json) = send(&app, "GET", "/policy", None).await;
    assert_eq!(json["preset"], "gentle");

    let (_, json) = send(&app, "GET", "/events/log?kind=parent-override", None).await;
    let event = &json["events"][0];
    assert_eq!(event["detail"]["preset"], "gentle");
    assert_eq!(event["detail"]["previous_preset"], "standard");
    assert_eq!(event["detail"]["source"], "parent");

    let (status, json) = send(&app, "POST", "/policy/preset", Some(json!({ "preset": "turbo" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], "error");
}

#[tokio::test]
async fn test_frame_push_outcomes() {
    let app = create_test_app().await;
    let frame = json!({
        "frequency_hz": 440.0,
        "note": "A4",
        "pitch_cents": 2.0,
        "confidence": 0.9,
        "has_signal": true
    });

    let (_, json) = send(&app, "POST", "/frames", Some(frame.clone())).await;
    assert_eq!(json["outcome"], "no-capture");

    send(&app, "POST", "/session/start", None).await;
    let (status, json) = send(&app, "POST", "/frames", Some(frame.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["outcome"], "accepted");

    send(&app, "POST", "/session/pause", None).await;
    let (_, json) = send(&app, "POST", "/frames", Some(frame)).await;
    assert_eq!(json["outcome"], "suspended");
}

#[tokio::test]
async fn test_event_log_query_validation() {
    let app = create_test_app().await;

    let (status, _) = send(&app, "GET", "/events/log?kind=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for _ in 0..3 {
        send(&app, "POST", "/session/start", None).await;
        send(&app, "POST", "/session/stop", None).await;
    }
    let (status, json) = send(&app, "GET", "/events/log?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "session-started");
    assert_eq!(events[1]["type"], "session-stopped");
}

#[tokio::test]
async fn test_quality_endpoint_without_data() {
    let app = create_test_app().await;
    let (status, json) = send(&app, "GET", "/quality", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["quality"].is_null());
    assert_eq!(json["blocked_events_total"], 0);
}

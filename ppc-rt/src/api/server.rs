//! HTTP server setup and routing

use crate::db::SqliteEventLog;
use crate::error::{Error, Result};
use crate::realtime::{ChannelFeatureSource, SessionController};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub controller: SessionController,
    /// Push side of the capture channel the controller reads from
    pub features: ChannelFeatureSource,
    pub event_log: SqliteEventLog,
    pub port: u16,
}

/// Build the router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        .route("/build_info", get(super::handlers::get_build_info))
        // Session lifecycle
        .route("/session", get(super::handlers::get_session))
        .route("/session/start", post(super::handlers::start_session))
        .route("/session/pause", post(super::handlers::pause_session))
        .route("/session/resume", post(super::handlers::resume_session))
        .route("/session/stop", post(super::handlers::stop_session))
        .route("/navigation", post(super::handlers::navigation))
        // Policy
        .route("/policy", get(super::handlers::get_policy))
        .route("/policy/preset", post(super::handlers::set_preset))
        // Feature push from an external extractor
        .route("/frames", post(super::handlers::push_frame))
        // Events
        .route("/events", get(super::sse::event_stream))
        .route("/events/log", get(super::handlers::get_event_log))
        .route("/quality", get(super::handlers::get_quality))
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until `shutdown` resolves
pub async fn run<F>(ctx: AppContext, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], ctx.port));
    let app = create_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    Ok(())
}

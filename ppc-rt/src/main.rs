//! Practice coach realtime engine (ppc-rt) - Main entry point
//!
//! Loads bootstrap config and database-backed tuning, wires the session
//! controller to its SQLite adapters and serves the HTTP/SSE API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ppc_common::config::{load_or_default, CONFIG_ENV_VAR};
use ppc_common::time::SystemClock;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ppc_rt::api::{self, AppContext};
use ppc_rt::db::settings::load_runtime_settings;
use ppc_rt::db::{SqliteCalibrationStore, SqliteEventLog, SqlitePresetStore};
use ppc_rt::realtime::{
    ChannelFeatureSource, ControllerDeps, DefaultEvaluatorFactory, SessionController,
};
use ppc_rt::SharedState;

const SHUTDOWN_STOP_REASON: &str = "shutdown";

/// Command-line arguments for ppc-rt
#[derive(Parser, Debug)]
#[command(name = "ppc-rt")]
#[command(about = "Realtime practice coaching engine")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "PPC_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config file)
    #[arg(short, long, env = "PPC_RT_PORT")]
    port: Option<u16>,

    /// Database file (overrides config file)
    #[arg(short, long, env = "PPC_DATABASE")]
    database: Option<PathBuf>,

    /// Evaluate policy inline instead of on the worker thread
    #[arg(long)]
    no_worker: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_or_default(args.config.as_deref(), CONFIG_ENV_VAR);
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if args.no_worker {
        config.worker_enabled = false;
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ppc_rt={0},ppc_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ppc-rt v{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let pool = ppc_common::db::init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    let settings = load_runtime_settings(&pool)
        .await
        .context("Failed to load runtime settings")?;
    info!(
        "Runtime settings loaded (worker: {}, eval timeout: {} ms)",
        config.worker_enabled, settings.policy_eval_timeout_ms
    );

    let features = ChannelFeatureSource::new(settings.capture_frame_buffer);
    let event_log = SqliteEventLog::new(pool.clone(), settings.event_log_max_entries);
    let deps = ControllerDeps {
        features: Arc::new(features.clone()),
        calibration_store: Arc::new(SqliteCalibrationStore::new(pool.clone())),
        preset_store: Arc::new(SqlitePresetStore::new(pool.clone())),
        event_log: Arc::new(event_log.clone()),
        evaluators: Arc::new(DefaultEvaluatorFactory {
            worker_enabled: config.worker_enabled,
            eval_timeout: settings.eval_timeout(),
            apply_timeout: settings.preset_apply_timeout(),
        }),
        clock: Arc::new(SystemClock),
    };

    let shared = Arc::new(SharedState::new());
    let controller = SessionController::new(deps, settings, shared);

    let ctx = AppContext {
        controller: controller.clone(),
        features,
        event_log,
        port: config.port,
    };

    // Close out the session (flushing calibration) before connections drain
    let shutdown = async move {
        shutdown_signal().await;
        if controller.get_session_state().active {
            controller.stop_session(SHUTDOWN_STOP_REASON).await;
            info!("Session closed on shutdown");
        }
    };

    api::run(ctx, shutdown).await.context("HTTP server failed")?;

    pool.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

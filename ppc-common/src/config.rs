//! Bootstrap configuration loading and data folder resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/ppc/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable config file never aborts startup; it is logged and
//! the compiled defaults are used instead.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PPC_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// Only settings needed before the database is open live here; runtime tuning
/// is read from the `settings` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (defaults under the data folder)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// HTTP control surface port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Run policy evaluation on a dedicated worker thread
    #[serde(default = "default_worker_enabled")]
    pub worker_enabled: bool,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            port: default_port(),
            worker_enabled: default_worker_enabled(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Database path, falling back to `<data folder>/ppc.db`
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_folder().join("ppc.db"))
    }
}

fn default_port() -> u16 {
    5790
}

fn default_worker_enabled() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
}

/// Locate the config file following the priority order above
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    dirs::config_dir()
        .map(|d| d.join("ppc").join("config.toml"))
        .filter(|p| p.exists())
}

/// Load bootstrap config, degrading to compiled defaults on any failure
pub fn load_or_default(cli_arg: Option<&Path>, env_var_name: &str) -> TomlConfig {
    let Some(path) = resolve_config_path(cli_arg, env_var_name) else {
        info!("No config file found, using compiled defaults");
        return TomlConfig::default();
    };

    match load_toml_config(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Failed to load config {}: {} (using compiled defaults)", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ppc"))
        .unwrap_or_else(|| PathBuf::from("./ppc_data"))
}

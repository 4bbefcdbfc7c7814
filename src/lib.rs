//! Reddit Campaigner
//!
//! Orchestrates browser-driven account sessions for campaign runs: persistent
//! per-account identity, proxy assignment and rotation, and concurrent
//! workers driving an external browser-automation capability against a shared
//! target URL, with per-account failure isolation.
//!
//! The integration surface is [`campaign::CampaignController`]; callers
//! supply a [`browser::BrowserAutomation`] implementation for whatever engine
//! they embed.

pub mod browser;
pub mod campaign;
pub mod pacing;
pub mod profile;
pub mod proxy;
pub mod store;
pub mod worker;

use std::path::PathBuf;
use tracing::{info, warn, error};

use pacing::PacingConfig;
use proxy::ProxyMode;

/// Orchestrator configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Account store file
    pub accounts_path: PathBuf,
    /// Proxy configuration file (re-read on every run)
    pub proxies_path: PathBuf,
    /// Root directory for per-account browser profiles
    pub profiles_dir: PathBuf,

    /// Concurrency ceiling for browser sessions
    #[serde(default = "default_concurrency")]
    pub concurrent_sessions: usize,

    /// Pacing between browser actions
    #[serde(default)]
    pub pacing: PacingConfig,

    /// Default proxy assignment policy
    #[serde(default)]
    pub proxy_mode: ProxyMode,

    /// Attempt cap for one proxy rotation
    #[serde(default = "default_rotation_attempts")]
    pub rotation_max_attempts: u32,
}

fn default_concurrency() -> usize {
    5
}

fn default_rotation_attempts() -> u32 {
    2
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            accounts_path: PathBuf::from("accounts.json"),
            proxies_path: PathBuf::from("proxies.json"),
            profiles_dir: PathBuf::from("profiles"),
            concurrent_sessions: default_concurrency(),
            pacing: PacingConfig::default(),
            proxy_mode: ProxyMode::Sticky,
            rotation_max_attempts: default_rotation_attempts(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("reddit-campaigner").join("logs"))
}

impl OrchestratorConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("reddit-campaigner").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Initialize logging (console layer plus a daily-rolling file layer)
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "reddit-campaigner.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

//! Loader configuration and its lookup.
//!
//! `LoaderConfig` is a plain serde struct with defaults. A process-wide
//! instance backs [`GlobalConfig`], which is what loaders read unless a fixed
//! config is injected. The playback core sees only [`ConfigProvider`].
//!
//! Config directory priority:
//! 1. explicit override (CLI `--config-dir`)
//! 2. `LOGPLAY_CONFIG_DIR` environment variable
//! 3. platform config directory from dirs-next
//!
//! Platform paths:
//! - Linux: ~/.config/logplay/{name}
//! - macOS: ~/Library/Application Support/logplay/{name}
//! - Windows: %APPDATA%\logplay\{name}

use anyhow::{Context, Result};
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Default config file name
pub const CONFIG_FILE: &str = "logplay.json";
/// Environment override for the config directory
pub const CONFIG_DIR_ENV: &str = "LOGPLAY_CONFIG_DIR";

/// Seconds the log start is shifted forward by default
pub const DEFAULT_TIME_WINDOW: f64 = 0.4;
/// One frame at 60Hz
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 16;

/// Tunables read by the playback core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Shift applied to the log start time, seconds
    pub time_window: f64,
    /// Frame interval of the timer scheduler
    pub tick_interval_ms: u64,
    /// Look-ahead written when a loader is created
    pub default_look_ahead: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            time_window: DEFAULT_TIME_WINDOW,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            default_look_ahead: 0.0,
        }
    }
}

impl LoaderConfig {
    /// Load from JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: LoaderConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Save as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}

/// Configuration lookup as seen by the playback core.
///
/// Read on every log-bounds computation, never cached by the provider.
pub trait ConfigProvider: Send + Sync {
    fn time_window(&self) -> f64;

    /// Look-ahead a new loader starts with
    fn default_look_ahead(&self) -> f64 {
        0.0
    }
}

/// A fixed config is its own provider (tests, embedded use).
impl ConfigProvider for LoaderConfig {
    fn time_window(&self) -> f64 {
        self.time_window
    }

    fn default_look_ahead(&self) -> f64 {
        self.default_look_ahead
    }
}

static GLOBAL: Lazy<RwLock<LoaderConfig>> = Lazy::new(|| RwLock::new(LoaderConfig::default()));

/// Snapshot of the process-wide config
pub fn global_config() -> LoaderConfig {
    GLOBAL.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Replace the process-wide config
pub fn set_global_config(config: LoaderConfig) {
    debug!("Global config updated: {:?}", config);
    *GLOBAL.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// Provider reading the process-wide config at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalConfig;

impl ConfigProvider for GlobalConfig {
    fn time_window(&self) -> f64 {
        GLOBAL.read().unwrap_or_else(|e| e.into_inner()).time_window
    }

    fn default_look_ahead(&self) -> f64 {
        GLOBAL.read().unwrap_or_else(|e| e.into_inner()).default_look_ahead
    }
}

/// Resolve the config directory (see module docs for priority)
pub fn config_dir(override_dir: Option<PathBuf>) -> PathBuf {
    override_dir
        .or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs_next::config_dir()
                .map(|d| d.join("logplay"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
}

/// Path of a named file inside the config directory
pub fn config_file(name: &str, override_dir: Option<PathBuf>) -> PathBuf {
    config_dir(override_dir).join(name)
}

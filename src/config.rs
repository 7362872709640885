//! Runtime configuration and config/log path resolution.

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::video::gpu::PixelFormat;
use crate::video::handoff::HandoffConfig;

pub const CONFIG_FILE: &str = "framewire.json";
pub const LOG_FILE: &str = "framewire.log";
const CONFIG_DIR_ENV: &str = "FRAMEWIRE_CONFIG_DIR";
const APP_DIR: &str = "framewire";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (FRAMEWIRE_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. FRAMEWIRE_CONFIG_DIR environment variable
/// 3. Local folder IF framewire.json or framewire.log exist there
/// 4. Platform-specific config directory from dirs-next (default)
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::config_dir()).join(name)
}

/// Get path to a data file (logs). Same priority as [`config_file`],
/// falling back to the platform data directory.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    resolve_dir(config, dirs_next::data_dir()).join(name)
}

/// Create the directory holding `path` if missing.
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
    }
    Ok(())
}

fn has_local_files(dir: &Path) -> bool {
    [CONFIG_FILE, LOG_FILE].iter().any(|f| dir.join(f).exists())
}

fn resolve_dir(config: &PathConfig, platform_dir: Option<PathBuf>) -> PathBuf {
    // Priority 1: Custom directory from CLI or ENV
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }

    // Priority 2: Local folder IF our files exist there
    if let Ok(current_dir) = std::env::current_dir() {
        if has_local_files(&current_dir) {
            return current_dir;
        }
    }

    // Priority 3: Platform-specific directory
    if let Some(dir) = platform_dir {
        return dir.join(APP_DIR);
    }

    PathBuf::from(".")
}

fn default_worker_threads() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// Core tunables, read from `framewire.json`. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Management queue workers
    pub worker_threads: usize,
    /// Backlog kept for `poll()` consumers per player
    pub event_queue_capacity: usize,
    /// Default wait for `Player::stop_sync` and player teardown
    pub stop_timeout_ms: u64,
    /// Wait for the compositor to confirm texture unregistration
    pub unregister_timeout_ms: u64,
    /// Zero-sized negotiations are clamped to this
    pub min_surface_dimension: u32,
    /// Passed to every `EngineFactory::create`
    pub engine_args: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            event_queue_capacity: 1000,
            stop_timeout_ms: 2000,
            unregister_timeout_ms: 5000,
            min_surface_dimension: 8,
            engine_args: Vec::new(),
        }
    }
}

impl CoreConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: CoreConfig =
            serde_json::from_str(&json).with_context(|| format!("Failed to parse config: {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `framewire.json` from the resolved config dir, defaults if absent.
    pub fn load_or_default(paths: &PathConfig) -> Result<Self> {
        let path = config_file(CONFIG_FILE, paths);
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn handoff_config(&self) -> HandoffConfig {
        HandoffConfig {
            min_dimension: self.min_surface_dimension.max(1),
            unregister_timeout: Duration::from_millis(self.unregister_timeout_ms),
            format: PixelFormat::Bgra8,
        }
    }
}

//! Agent configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/mediavault/mediavault.toml`
//! - Windows: `%APPDATA%/mediavault/mediavault.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use mediavault_resources::ResourceConfig;
use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the filesystem storage backend.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between stale-session sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Idle seconds after which an incomplete session is abandoned.
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,

    /// Upload limits and defaults.
    #[serde(default)]
    pub resources: ResourceConfig,
}

fn default_storage_root() -> PathBuf {
    data_dir().join("store")
}

fn default_log_level() -> String {
    "info".into()
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_idle_secs() -> u64 {
    30 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            log_level: default_log_level(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_idle_secs: default_max_idle_secs(),
            resources: ResourceConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the platform default), creating
    /// a default file if none exists.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("mediavault").join("mediavault.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("mediavault")
            .join("mediavault.toml")
    }
}

/// Returns the platform-specific data directory.
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let local = std::env::var("LOCALAPPDATA")
            .unwrap_or_else(|_| "C:\\Users\\Default\\AppData\\Local".into());
        PathBuf::from(local).join("mediavault")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("mediavault")
    }
}

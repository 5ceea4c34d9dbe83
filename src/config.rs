//! Configuration for the prefetch engine and interposer.
//!
//! The standalone CLIs (`precache`, `precache-dir`) and the interposed
//! library all funnel through the same two environment variables described
//! in the external-interfaces contract; `Config::from_env` is the single
//! source of truth both paths use. A config file is optional and mainly
//! useful for tuning the extent-query and read-buffer sizes outside of the
//! environment.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-session cache limit: 1 GiB (`PRECACHE_LIMIT`).
pub const DEFAULT_CACHE_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Default FIEMAP round-trip extent buffer capacity.
pub const DEFAULT_EXTENT_BUFFER_ELEMENTS: u32 = 1000;

/// Default `pread` chunk size used while reading segments.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512 * 1024;

/// Default mount-table refresh throttle.
pub const DEFAULT_MOUNT_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Whether to invoke `sync` before a precache burst (`PRECACHE_SYNC`).
    pub sync_before_precache: bool,

    /// Maximum cumulative file size precached per burst (`PRECACHE_LIMIT`).
    pub cache_limit_bytes: u64,

    /// Extents requested per FIEMAP round-trip.
    pub extent_buffer_elements: u32,

    /// Size of the reusable read buffer.
    pub read_buffer_size: usize,

    /// Minimum interval between mount-table rescans.
    #[serde(with = "duration_secs")]
    pub mount_refresh_interval: Duration,

    /// Program name used to recognize an overlay-daemon process in
    /// `/proc/<pid>/cmdline`.
    pub overlay_daemon_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sync_before_precache: true,
            cache_limit_bytes: DEFAULT_CACHE_LIMIT_BYTES,
            extent_buffer_elements: DEFAULT_EXTENT_BUFFER_ELEMENTS,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            mount_refresh_interval: DEFAULT_MOUNT_REFRESH_INTERVAL,
            overlay_daemon_name: "encfs".to_string(),
        }
    }
}

impl Config {
    /// Build a config from defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration from a JSON file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("failed to write config file: {e}")))?;
        Ok(())
    }

    /// Apply `PRECACHE_SYNC` / `PRECACHE_LIMIT` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PRECACHE_SYNC") {
            if let Ok(n) = val.trim().parse::<i64>() {
                self.sync_before_precache = n != 0;
            }
        }

        if let Ok(val) = std::env::var("PRECACHE_LIMIT") {
            if let Ok(n) = val.trim().parse::<u64>() {
                self.cache_limit_bytes = n;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.extent_buffer_elements == 0 {
            return Err(Error::InvalidConfig(
                "extent_buffer_elements must be greater than 0".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config file location, `$XDG_CONFIG_HOME/precache/config.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("precache")
            .join("config.json")
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_are_applied() {
        std::env::set_var("PRECACHE_SYNC", "0");
        std::env::set_var("PRECACHE_LIMIT", "12345");
        let config = Config::from_env();
        assert!(!config.sync_before_precache);
        assert_eq!(config.cache_limit_bytes, 12345);
        std::env::remove_var("PRECACHE_SYNC");
        std::env::remove_var("PRECACHE_LIMIT");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::default();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.cache_limit_bytes, config.cache_limit_bytes);
    }
}

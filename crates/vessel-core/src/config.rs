//! Shell configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vessel_updater::UpdaterSettings;

use crate::error::CoreError;
use crate::Result;

const DEFAULT_FEED: &str = "https://api.github.com/repos/vessel-shell/vessel/releases/latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the settings database
    pub database_path: PathBuf,
    /// Where update installers are downloaded to
    pub staging_dir: PathBuf,
    pub release_feed_url: String,
    pub current_version: String,
    pub check_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub install_delay_ms: u64,
    pub snooze_duration_secs: u64,
    /// Unset disables background update checks
    pub check_interval_secs: Option<u64>,
    pub status_poll_interval_ms: u64,
    pub debounce_window_ms: u64,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("vessel.db"),
            staging_dir: data_dir.join("updates"),
            release_feed_url: DEFAULT_FEED.to_string(),
            current_version: env!("CARGO_PKG_VERSION").to_string(),
            check_timeout_ms: 30_000,
            download_timeout_ms: 5 * 60_000,
            install_delay_ms: 100,
            snooze_duration_secs: 24 * 60 * 60,
            check_interval_secs: None,
            status_poll_interval_ms: 2_000,
            debounce_window_ms: 100,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("Vessel"))
            .unwrap_or_else(|| PathBuf::from(".vessel"))
    }

    /// Reads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn updater_settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            current_version: self.current_version.clone(),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            download_timeout: Duration::from_millis(self.download_timeout_ms),
            install_delay: Duration::from_millis(self.install_delay_ms),
            snooze_duration: Duration::from_secs(self.snooze_duration_secs),
            check_interval: self.check_interval_secs.map(Duration::from_secs),
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::env;
    use std::path::PathBuf;

    fn home() -> Option<PathBuf> {
        env::var_os("HOME").map(PathBuf::from)
    }

    pub fn data_local_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            env::var_os("LOCALAPPDATA").map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            home().map(|h| h.join("Library/Application Support"))
        } else {
            env::var_os("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| home().map(|h| h.join(".local/share")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new(PathBuf::from("/data"));
        assert_eq!(config.database_path, PathBuf::from("/data/vessel.db"));
        assert_eq!(config.staging_dir, PathBuf::from("/data/updates"));

        let updater = config.updater_settings();
        assert_eq!(updater.check_timeout, Duration::from_secs(30));
        assert_eq!(updater.download_timeout, Duration::from_secs(300));
        assert_eq!(updater.install_delay, Duration::from_millis(100));
        assert_eq!(updater.snooze_duration, Duration::from_secs(86_400));
        assert_eq!(updater.check_interval, None);
        assert_eq!(config.status_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.debounce_window(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "check_interval_secs": 3600, "debounce_window_ms": 50 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.check_interval_secs, Some(3600));
        assert_eq!(config.debounce_window_ms, 50);
        assert_eq!(config.status_poll_interval_ms, 2_000);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(CoreError::Config(_))));
    }
}

use crate::error::{TaskError, TaskResult};
use crate::registry::task::Projection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default backend address
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub downloader: DownloaderConfig,
}

/// Settings for [`crate::TaskController`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Projection passed to the downloader with every task
    pub projection: Projection,
    /// Time between progress queries, in milliseconds
    pub poll_interval_ms: u64,
    /// Minimum time between two effective toggles of one task, in milliseconds
    pub toggle_interval_ms: u64,
    /// Buffered progress events per subscriber
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            projection: Projection::Epsg4326,
            poll_interval_ms: 1000,
            toggle_interval_ms: 500,
            event_capacity: 256,
        }
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn toggle_interval(&self) -> Duration {
        Duration::from_millis(self.toggle_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub base_url: String,
    /// Request timeout, in seconds
    pub timeout_secs: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl DownloaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load a TOML file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> TaskResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| TaskError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TaskResult<()> {
        if self.controller.poll_interval_ms == 0 {
            return Err(TaskError::Config("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.controller.toggle_interval_ms == 0 {
            return Err(TaskError::Config("toggle_interval_ms must be greater than 0".to_string()));
        }
        if self.controller.event_capacity == 0 {
            return Err(TaskError::Config("event_capacity must be greater than 0".to_string()));
        }
        if self.downloader.base_url.trim().is_empty() {
            return Err(TaskError::Config("base_url must not be empty".to_string()));
        }
        if self.downloader.timeout_secs == 0 {
            return Err(TaskError::Config("timeout_secs must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.controller.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.controller.toggle_interval(), Duration::from_millis(500));
        assert_eq!(config.controller.projection, Projection::Epsg4326);
        assert_eq!(config.downloader.base_url, DEFAULT_BASE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.controller.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(TaskError::Config(_))));

        config = Config::default();
        config.downloader.base_url = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[controller]\nprojection = \"EPSG:3857\"\npoll_interval_ms = 250\n\n[downloader]\nbase_url = \"http://tiles.local:8080\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.controller.projection, Projection::Epsg3857);
        assert_eq!(config.controller.poll_interval_ms, 250);
        assert_eq!(config.controller.toggle_interval_ms, 500);
        assert_eq!(config.downloader.base_url, "http://tiles.local:8080");
        assert_eq!(config.downloader.timeout_secs, 30);
    }

    #[test]
    fn test_config_load_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_load_rejects_invalid_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[controller]\ntoggle_interval_ms = 0").unwrap();

        assert!(matches!(Config::load(file.path()), Err(TaskError::Config(_))));
    }
}

//! Configuration Module
//!
//! Provides TOML-based configuration for deauth-watch.
//! Configuration is optional - CLI arguments override file settings.
//! Values are fixed for the lifetime of a session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::replay::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if given, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capture.interface.trim().is_empty() {
            anyhow::bail!("interface must not be empty");
        }
        if self.detection.threshold == 0 {
            anyhow::bail!("threshold must be greater than 0");
        }
        if self.detection.window_secs == 0 {
            anyhow::bail!("window_secs must be greater than 0");
        }
        if self.capture.poll_timeout_ms == 0 {
            anyhow::bail!("poll_timeout_ms must be greater than 0");
        }
        if self.output.refresh_ms == 0 {
            anyhow::bail!("refresh_ms must be greater than 0");
        }
        Ok(())
    }

    pub fn window_interval(&self) -> Duration {
        Duration::from_secs(self.detection.window_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.poll_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.output.refresh_ms)
    }
}

/// Capture-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Wireless interface to put into monitor mode
    pub interface: String,
    /// Interface created by the adapter tool (None = `<interface>mon`)
    pub monitor_interface: Option<String>,
    /// Enable promiscuous mode on the capture handle
    pub promiscuous: bool,
    /// Upper bound on a single poll, in milliseconds
    pub poll_timeout_ms: u64,
    /// Monitor-mode tool
    pub adapter_tool: String,
    /// Run the adapter tool through sudo
    pub use_sudo: bool,
}

impl CaptureConfig {
    pub fn monitor_interface(&self) -> String {
        self.monitor_interface
            .clone()
            .unwrap_or_else(|| format!("{}mon", self.interface))
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_string(),
            monitor_interface: None,
            promiscuous: true,
            poll_timeout_ms: 250,
            adapter_tool: "airmon-ng".to_string(),
            use_sudo: true,
        }
    }
}

/// Detection-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Alert when an address sends more than this many deauth frames in a window
    pub threshold: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 15,
            window_secs: 10,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Append-only log file
    pub log_file: PathBuf,
    /// Dashboard refresh interval in milliseconds
    pub refresh_ms: u64,
    /// Offline report format (text, json)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("deauth_detector.log"),
            refresh_ms: 1000,
            format: OutputFormat::Text,
            verbose: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.capture.interface, "wlan0");
        assert_eq!(config.capture.monitor_interface(), "wlan0mon");
        assert_eq!(config.detection.threshold, 15);
        assert_eq!(config.window_interval(), Duration::from_secs(10));
        assert_eq!(config.output.log_file, PathBuf::from("deauth_detector.log"));
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.detection.threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.interface = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[capture]"));
        assert!(config_str.contains("[detection]"));
        assert!(config_str.contains("[output]"));
        assert!(config_str.contains("threshold = 15"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[capture]
interface = "wlan1"
monitor_interface = "mon0"
use_sudo = false

[detection]
threshold = 40
window_secs = 30

[output]
format = "json"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.capture.interface, "wlan1");
        assert_eq!(config.capture.monitor_interface(), "mon0");
        assert!(!config.capture.use_sudo);
        assert_eq!(config.capture.adapter_tool, "airmon-ng");
        assert_eq!(config.detection.threshold, 40);
        assert_eq!(config.window_interval(), Duration::from_secs(30));
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = Config::load(Path::new("/nonexistent/deauth-watch.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

//! Bridge configuration.
//!
//! Loaded from `config.toml` in the platform data directory. Missing files
//! and missing keys fall back to the defaults.

use crate::ble::server::ServerSettings;
use crate::sensors::ant::ConnectorSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Advertised BLE device name
    pub device_name: String,
    /// Notification period in milliseconds
    pub notify_interval_ms: u64,
    /// Wheel circumference for speed derivation (meters)
    pub wheel_circumference_m: f64,
    /// Stride cadence averaging window (milliseconds)
    pub stride_window_ms: i64,
    /// Maximum stride samples kept per sensor
    pub stride_history_limit: usize,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let connector = ConnectorSettings::default();
        Self {
            device_name: "ANT+ Bridge".to_string(),
            notify_interval_ms: 1000,
            wheel_circumference_m: connector.wheel_circumference_m,
            stride_window_ms: connector.stride_window_ms,
            stride_history_limit: connector.stride_history_limit,
            log_level: "info".to_string(),
        }
    }
}

impl From<&BridgeConfig> for ServerSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            device_name: config.device_name.clone(),
            notify_interval: Duration::from_millis(config.notify_interval_ms.max(1)),
        }
    }
}

impl From<&BridgeConfig> for ConnectorSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            wheel_circumference_m: config.wheel_circumference_m,
            stride_window_ms: config.stride_window_ms,
            stride_history_limit: config.stride_history_limit,
        }
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "antbridge", "AntBridge")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load configuration from the default location.
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
    load_config_from(&get_config_path())
}

/// Load configuration from `path`, or defaults if it does not exist.
pub fn load_config_from(path: &Path) -> Result<BridgeConfig, ConfigError> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save configuration to `path`, creating parent directories.
pub fn save_config_to(config: &BridgeConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

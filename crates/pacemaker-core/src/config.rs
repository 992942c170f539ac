//! DCM configuration
//!
//! Timing and identity settings for the transport and session loops, stored as
//! JSON. Every field has a default, so a partial file (or none) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS, PACEMAKER_PID, PACEMAKER_VID};

/// Errors loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid configuration JSON
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serial transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Baud rate
    pub baud_rate: u32,

    /// Per-read timeout in milliseconds
    pub read_timeout_ms: u64,

    /// Sleep while no port is bound, in milliseconds
    pub idle_interval_ms: u64,

    /// Delay before retrying a failed open, in milliseconds
    pub open_retry_ms: u64,

    /// Pause after a swallowed I/O error, in milliseconds
    pub error_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            idle_interval_ms: 1000,
            open_retry_ms: 50,
            error_backoff_ms: 20,
        }
    }
}

impl TransportConfig {
    /// Per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Sleep while no port is bound
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    /// Delay before retrying a failed open
    pub fn open_retry(&self) -> Duration {
        Duration::from_millis(self.open_retry_ms)
    }

    /// Pause after a swallowed I/O error
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Device discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between discovery scans in milliseconds
    pub scan_interval_ms: u64,

    /// USB vendor ID of eligible devices
    pub vendor_id: u16,

    /// USB product ID of eligible devices
    pub product_id: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 10,
            vendor_id: PACEMAKER_VID,
            product_id: PACEMAKER_PID,
        }
    }
}

impl SessionConfig {
    /// Interval between discovery scans
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

/// Complete DCM configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcmConfig {
    /// Serial transport settings
    pub transport: TransportConfig,
    /// Device discovery settings
    pub session: SessionConfig,
}

impl DcmConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = DcmConfig::default();
        assert_eq!(config.transport.baud_rate, 115200);
        assert_eq!(config.transport.idle_interval(), Duration::from_secs(1));
        assert_eq!(config.session.scan_interval(), Duration::from_millis(10));
        assert_eq!(config.session.vendor_id, 0x1366);
        assert_eq!(config.session.product_id, 0x1015);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcm.json");
        fs::write(&path, r#"{ "session": { "scan_interval_ms": 25 } }"#).unwrap();

        let config = DcmConfig::load(&path).unwrap();
        assert_eq!(config.session.scan_interval_ms, 25);
        assert_eq!(config.session.vendor_id, PACEMAKER_VID);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcm.json");

        let mut config = DcmConfig::default();
        config.transport.baud_rate = 57600;
        config.save(&path).unwrap();

        assert_eq!(DcmConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dcm.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(DcmConfig::load(&path), Err(ConfigError::Json(_))));
    }
}

//! Serial port settings
//!
//! An immutable snapshot handed to the transport on every (re)connect.
//! Persisted as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_RESPONSE_DELAY_MS,
    DEFAULT_TIMEOUT_MS,
};

/// Parity bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    None,
    /// Odd parity (regulator default)
    Odd,
    /// Even parity
    Even,
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits (regulator default)
    Two,
}

/// Communication port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComPortSettings {
    /// Port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Line speed
    pub baud_rate: u32,
    /// Data bits per character, 5 to 8
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Parity
    pub parity: Parity,
    /// Per-call read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Per-call write timeout in milliseconds
    pub write_timeout_ms: u64,
    /// Telemetry polling interval in milliseconds
    pub polling_interval_ms: u64,
    /// Controller turnaround delay before the first read in milliseconds
    pub response_delay_ms: u64,
}

impl Default for ComPortSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: StopBits::Two,
            parity: Parity::Odd,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_TIMEOUT_MS,
            polling_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            response_delay_ms: DEFAULT_RESPONSE_DELAY_MS,
        }
    }
}

impl ComPortSettings {
    /// Default settings for a named port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Per-call read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Per-call write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Telemetry polling interval
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Turnaround delay before the first read
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }

    /// Reject settings no transport could honor
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::Settings("baud rate must be non-zero".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ProtocolError::Settings(format!(
                "unsupported data bits: {}",
                self.data_bits
            )));
        }
        if self.polling_interval_ms == 0 {
            return Err(ProtocolError::Settings(
                "polling interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Load settings from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write the settings as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ProtocolError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_fixed_defaults() {
        let settings = ComPortSettings::default();
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.parity, Parity::Odd);
        assert_eq!(settings.polling_interval(), Duration::from_millis(500));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: ComPortSettings =
            serde_json::from_str(r#"{ "port_name": "/dev/ttyUSB1", "read_timeout_ms": 250 }"#)
                .unwrap();
        assert_eq!(settings.port_name, "/dev/ttyUSB1");
        assert_eq!(settings.read_timeout_ms, 250);
        assert_eq!(settings.baud_rate, 9600);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = ComPortSettings::for_port("COM3");
        settings.data_bits = 9;
        assert!(matches!(settings.validate(), Err(ProtocolError::Settings(_))));

        settings.data_bits = 8;
        settings.baud_rate = 0;
        assert!(settings.validate().is_err());
    }
}

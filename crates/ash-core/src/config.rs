//! Dongle configuration.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::driver::AshTimeouts;
use crate::protocol::constants::DEFAULT_BAUD_RATE;

/// Configuration for a dongle session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Use RTS/CTS.
    pub hardware_flow_control: bool,
    /// Serial read timeout of the host loop, in milliseconds.
    pub poll_interval_ms: u64,
    /// DATA acknowledgement timeout, in milliseconds.
    pub data_ack_timeout_ms: u64,
    /// RST acknowledgement timeout, in milliseconds.
    pub reset_ack_timeout_ms: u64,
    /// Bootloader quiet period, in milliseconds.
    pub bootloader_quiet_ms: u64,
    /// Go to firmware upgrade instead of back to EZSP when the first reset fails.
    pub force_firmware_upgrade_on_init_timeout: bool,
    /// Resend unacknowledged DATA frames instead of only logging.
    pub retransmit_on_ack_timeout: bool,
    /// Resend limit per frame when `retransmit_on_ack_timeout` is set.
    pub max_retransmits: u32,
}

impl Default for DongleConfig {
    fn default() -> Self {
        let timeouts = AshTimeouts::default();
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            hardware_flow_control: false,
            poll_interval_ms: 20,
            data_ack_timeout_ms: timeouts.data_ack.as_millis() as u64,
            reset_ack_timeout_ms: timeouts.reset_ack.as_millis() as u64,
            bootloader_quiet_ms: 100,
            force_firmware_upgrade_on_init_timeout: false,
            retransmit_on_ack_timeout: false,
            max_retransmits: 3,
        }
    }
}

impl DongleConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DongleConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn ash_timeouts(&self) -> AshTimeouts {
        AshTimeouts {
            data_ack: Duration::from_millis(self.data_ack_timeout_ms),
            reset_ack: Duration::from_millis(self.reset_ack_timeout_ms),
        }
    }

    pub fn bootloader_quiet_period(&self) -> Duration {
        Duration::from_millis(self.bootloader_quiet_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = DongleConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.ash_timeouts(), AshTimeouts::default());
        assert_eq!(config.bootloader_quiet_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: DongleConfig =
            toml::from_str("port = \"/dev/ttyACM0\"\nretransmit_on_ack_timeout = true\n").unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert!(config.retransmit_on_ack_timeout);
        assert_eq!(config.data_ack_timeout_ms, 1600);
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("ash-core-config-{}.toml", std::process::id()));
        let config = DongleConfig {
            port: "/dev/ttyUSB1".into(),
            baud_rate: 57_600,
            force_firmware_upgrade_on_init_timeout: true,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = DongleConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}

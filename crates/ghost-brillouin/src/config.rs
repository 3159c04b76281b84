//! Configuration for the spectrometer controller.
//!
//! Configuration can be deserialized from a TOML table:
//!
//! ```rust,ignore
//! let config = toml::toml! {
//!     host = "192.168.0.12"
//!     port = 4000
//!
//!     [clock]
//!     clock_frequency_khz = 10.0
//!     channel_count = 512
//! };
//! let config = SpectrometerConfig::from_toml(config.into())?;
//! ```

use std::time::Duration;

use ghost_core::transport::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT};
use ghost_core::{GhostError, Result};
use serde::Deserialize;

use crate::timing::CLOCK_COUNTS_PER_CYCLE;

/// MCA channel count of the standard configuration.
pub const STANDARD_CHANNEL_COUNT: u32 = 2048;

/// MCA channel count of the high-speed configuration.
pub const HIGH_SPEED_CHANNEL_COUNT: u32 = 512;

/// Scan clock settings selected at controller construction.
///
/// Immutable once the controller exists; every derived timing comes from
/// these two values. Frequencies other than the two stock configurations
/// are permitted and scale all timings linearly.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ClockConfig {
    /// Scan clock frequency in kHz.
    pub clock_frequency_khz: f64,
    /// MCA channel count of the operating mode, selected on the device via
    /// `SET{n}` during initialization.
    pub channel_count: u32,
}

impl ClockConfig {
    /// The original 4 kHz / 2048-channel configuration.
    pub fn standard() -> Self {
        Self {
            clock_frequency_khz: 4.0,
            channel_count: STANDARD_CHANNEL_COUNT,
        }
    }

    /// The 10 kHz / 512-channel high-speed configuration, trading
    /// resolution for faster cycles.
    pub fn high_speed() -> Self {
        Self {
            clock_frequency_khz: 10.0,
            channel_count: HIGH_SPEED_CHANNEL_COUNT,
        }
    }

    /// Time for one scan+retract cycle at this clock frequency.
    ///
    /// One cycle consumes [`CLOCK_COUNTS_PER_CYCLE`] clock counts, so at
    /// 4 kHz a cycle takes 615 ms and at 10 kHz 246 ms.
    pub fn cycle_time(&self) -> Duration {
        Duration::from_secs_f64(CLOCK_COUNTS_PER_CYCLE / (self.clock_frequency_khz * 1000.0))
    }

    /// Validate the semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !(self.clock_frequency_khz.is_finite() && self.clock_frequency_khz > 0.0) {
            return Err(GhostError::Validation(format!(
                "clock frequency must be a positive number of kHz, got {}",
                self.clock_frequency_khz
            )));
        }
        if self.channel_count == 0 {
            return Err(GhostError::Validation(
                "channel count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SpectrometerConfig {
    /// Host the GHOST program listens on.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port of the GHOST program.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-command reply timeout in milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Scan clock configuration.
    #[serde(default)]
    pub clock: ClockConfig,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_millis() as u64
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl SpectrometerConfig {
    /// Parse and validate a configuration from a TOML value.
    pub fn from_toml(value: toml::Value) -> Result<Self> {
        let config: Self = value
            .try_into()
            .map_err(|e| GhostError::Validation(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the semantic constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(GhostError::Validation("host must not be empty".to_string()));
        }
        if self.command_timeout_ms == 0 {
            return Err(GhostError::Validation(
                "command timeout must be positive".to_string(),
            ));
        }
        self.clock.validate()
    }

    /// Per-command reply timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Connection establishment timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clock: ClockConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpectrometerConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 4000);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.clock, ClockConfig::standard());
    }

    #[test]
    fn test_stock_clock_configurations() {
        let standard = ClockConfig::standard();
        assert_eq!(standard.clock_frequency_khz, 4.0);
        assert_eq!(standard.channel_count, 2048);
        assert_eq!(standard.cycle_time(), Duration::from_millis(615));

        let high_speed = ClockConfig::high_speed();
        assert_eq!(high_speed.clock_frequency_khz, 10.0);
        assert_eq!(high_speed.channel_count, 512);
        assert_eq!(high_speed.cycle_time(), Duration::from_millis(246));
    }

    #[test]
    fn test_from_toml_with_defaults() {
        let value = toml::Value::Table(toml::toml! {
            host = "192.168.0.12"
        });
        let config = SpectrometerConfig::from_toml(value).unwrap();
        assert_eq!(config.host, "192.168.0.12");
        assert_eq!(config.port, 4000);
        assert_eq!(config.clock, ClockConfig::standard());
    }

    #[test]
    fn test_from_toml_high_speed_clock() {
        let value = toml::Value::Table(toml::toml! {
            [clock]
            clock_frequency_khz = 10.0
            channel_count = 512
        });
        let config = SpectrometerConfig::from_toml(value).unwrap();
        assert_eq!(config.clock, ClockConfig::high_speed());
    }

    #[test]
    fn test_invalid_clock_frequency_rejected() {
        for frequency in [0.0, -4.0, f64::NAN] {
            let clock = ClockConfig {
                clock_frequency_khz: frequency,
                channel_count: 2048,
            };
            assert!(clock.validate().is_err(), "accepted frequency {frequency}");
        }
    }

    #[test]
    fn test_invalid_channel_count_rejected() {
        let clock = ClockConfig {
            clock_frequency_khz: 4.0,
            channel_count: 0,
        };
        assert!(matches!(
            clock.validate(),
            Err(GhostError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_host_rejected() {
        let value = toml::Value::Table(toml::toml! {
            host = "  "
        });
        assert!(SpectrometerConfig::from_toml(value).is_err());
    }
}

//! Session configuration.
//!
//! A configuration can be built in code or loaded from a TOML file such as:
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 57600
//!
//! [timing]
//! command_pause_ms = 10
//! settle_ms = 250
//! ```
//!
//! Every field is optional and falls back to the defaults below.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

/// Default baud rate of the instrument's RS-232 interface.
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Fast-measurement configuration applied on every connect, in order.
pub const STARTUP_COMMANDS: [&str; 15] = [
    "*RST",
    ":SYST:TIME:RES:AUTO 1",
    ":SYST:BEEP:STAT 0",
    ":SOUR:FUNC CURR",
    ":SENS:FUNC:CONC OFF",
    ":SENS:AVER:STAT OFF",
    ":SENS:CURR:NPLC 0.01",
    ":SENS:VOLT:NPLC 0.01",
    ":SENS:RES:NPLC 0.01",
    ":SENS:FUNC 'VOLT'",
    ":SENS:VOLT:RANG 1e1",
    ":TRIG:DEL 0.0",
    ":SYST:AZER:STAT OFF",
    ":SOUR:DELAY 0.0",
    ":DISP:ENAB OFF",
];

/// Fixed pauses between commands, in milliseconds.
///
/// The instrument drops or garbles commands that arrive before its command
/// buffer has settled, so these may be tuned but not removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Between startup commands.
    pub command_pause_ms: u64,
    /// Around output switching and arming in a plain read, and after a sweep's fetch.
    pub settle_ms: u64,
    /// Between sweep programming commands.
    pub sweep_pause_ms: u64,
    /// Between writing a query and reading its answer.
    pub response_wait_ms: u64,
}

impl Timing {
    pub fn command_pause(&self) -> Duration {
        Duration::from_millis(self.command_pause_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn sweep_pause(&self) -> Duration {
        Duration::from_millis(self.sweep_pause_ms)
    }

    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(self.response_wait_ms)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            command_pause_ms: 10,
            settle_ms: 250,
            sweep_pause_ms: 100,
            response_wait_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: Option<String>,
    pub baud_rate: u32,
    /// Use the no-op session instead of real hardware.
    pub offline: bool,
    pub startup_commands: Vec<String>,
    pub timing: Timing,
}

impl SessionConfig {
    pub fn for_port(port: &str) -> Self {
        Self {
            port: Some(port.to_string()),
            ..Self::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Label used for this session's link in logs and errors.
    pub fn port_label(&self) -> &str {
        self.port.as_deref().unwrap_or("<unnamed port>")
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            offline: false,
            startup_commands: STARTUP_COMMANDS.iter().map(|c| c.to_string()).collect(),
            timing: Timing::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_instrument_link() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.startup_commands.len(), 15);
        assert_eq!(config.startup_commands[0], "*RST");
        assert_eq!(config.startup_commands[14], ":DISP:ENAB OFF");
        assert_eq!(config.timing.command_pause(), Duration::from_millis(10));
        assert_eq!(config.timing.sweep_pause(), Duration::from_millis(100));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(
            r#"
            port = "/dev/ttyUSB0"

            [timing]
            settle_ms = 300
            "#,
        )
        .unwrap();
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timing.settle_ms, 300);
        assert_eq!(config.timing.command_pause_ms, 10);
        assert_eq!(config.startup_commands.len(), 15);
    }

    #[test]
    fn startup_list_can_be_replaced() {
        let config = SessionConfig::from_toml_str(r#"startup_commands = ["*RST", ":DISP:ENAB OFF"]"#).unwrap();
        assert_eq!(config.startup_commands, ["*RST", ":DISP:ENAB OFF"]);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(SessionConfig::from_toml_str("baud_rate = \"fast\""), Err(Error::Config(_))));
    }
}

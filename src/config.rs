//! # Configuration Module
//!
//! The controller's live configuration, the attribute keys a front end can
//! change one at a time, and the binary's TOML application config.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConnectError, RelayError, Result};

/// GPS baud rates the relay accepts
pub const SUPPORTED_GPS_BAUD: &[u32] = &[4800, 9600, 38400, 57600];

/// Live controller configuration, supplied atomically at connect time
///
/// Individual fields may be changed afterwards through
/// [`AttrKey`]-addressed attribute sets; a `None` device or host disables
/// that path.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// GPS serial device (or replay file); `None` disables GPS ingestion
    #[serde(default)]
    pub gps_port: Option<String>,

    #[serde(default = "default_gps_baud")]
    pub gps_baud: u32,

    /// ROVL (USBL) serial device (or replay file); `None` disables USBL
    #[serde(default)]
    pub rovl_port: Option<String>,

    /// Ground control station host; `None` disables the GCS endpoint
    #[serde(default)]
    pub gcs_host: Option<String>,

    #[serde(default = "default_gcs_port")]
    pub gcs_port: u16,

    /// ROV host; `None` disables the ROV endpoint
    #[serde(default)]
    pub rov_host: Option<String>,

    #[serde(default = "default_rov_port")]
    pub rov_port: u16,
}

// Default value functions
fn default_gps_baud() -> u32 { 9600 }
fn default_gcs_port() -> u16 { 27000 }
fn default_rov_port() -> u16 { 25100 }

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            gps_port: None,
            gps_baud: default_gps_baud(),
            rovl_port: None,
            gcs_host: None,
            gcs_port: default_gcs_port(),
            rov_host: None,
            rov_port: default_rov_port(),
        }
    }
}

impl ControllerConfig {
    /// GCS address as "host:port", if a GCS host is configured
    pub fn gcs_addr(&self) -> Option<String> {
        self.gcs_host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| format!("{}:{}", host, self.gcs_port))
    }

    /// ROV address as "host:port", if an ROV host is configured
    pub fn rov_addr(&self) -> Option<String> {
        self.rov_host
            .as_deref()
            .filter(|host| !host.is_empty())
            .map(|host| format!("{}:{}", host, self.rov_port))
    }

    /// Validate a configuration before a connect
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if:
    /// - Neither a GPS nor a USBL device is set
    /// - Neither a GCS nor an ROV address is set
    /// - A GPS device is set with an unsupported baud rate
    pub fn validate(&self) -> std::result::Result<(), ConnectError> {
        if self.gps_port.is_none() && self.rovl_port.is_none() {
            return Err(ConnectError::InvalidConfig(
                "at least one of gps_port or rovl_port must be set".to_string(),
            ));
        }

        if self.gcs_addr().is_none() && self.rov_addr().is_none() {
            return Err(ConnectError::InvalidConfig(
                "at least one of gcs_host or rov_host must be set".to_string(),
            ));
        }

        if self.gps_port.is_some() && !SUPPORTED_GPS_BAUD.contains(&self.gps_baud) {
            return Err(ConnectError::InvalidConfig(format!(
                "unsupported GPS baud rate {}, expected one of {:?}",
                self.gps_baud, SUPPORTED_GPS_BAUD
            )));
        }

        Ok(())
    }
}

/// The configuration attributes a front end can change one at a time
///
/// Key names match the original relay's attribute protocol: `addr_mav` is
/// the ROV address, `addr_echo` the GCS (GPS echo) address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKey {
    DevGps,
    DevUsbl,
    AddrMav,
    AddrEcho,
}

impl AttrKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKey::DevGps => "dev_gps",
            AttrKey::DevUsbl => "dev_usbl",
            AttrKey::AddrMav => "addr_mav",
            AttrKey::AddrEcho => "addr_echo",
        }
    }
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttrKey {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dev_gps" => Ok(AttrKey::DevGps),
            "dev_usbl" => Ok(AttrKey::DevUsbl),
            "addr_mav" => Ok(AttrKey::AddrMav),
            "addr_echo" => Ok(AttrKey::AddrEcho),
            other => Err(RelayError::UnknownAttribute(other.to_string())),
        }
    }
}

/// Relay tuning knobs
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    /// Maximum age of the newest GPS fix for `sync_location` to proceed
    #[serde(default = "default_stale_fix_threshold_ms")]
    pub stale_fix_threshold_ms: u64,
}

fn default_stale_fix_threshold_ms() -> u64 { 5000 }

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            stale_fix_threshold_ms: default_stale_fix_threshold_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    /// Directory for rolling log files; `None` logs to stderr only
    #[serde(default)]
    pub directory: Option<String>,
}

/// Main configuration structure for the binary
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the TOML fails to parse.
    /// Controller-level validation happens at connect time, not here, so a
    /// config file can hold a partial setup the front end completes later.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

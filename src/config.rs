//! Configuration loading using Figment.
//!
//! Configuration is layered:
//! 1. Built-in defaults
//! 2. `config/scpi.toml` (or an explicit file)
//! 3. Environment variables prefixed with `RUST_SCPI_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use rust_scpi::config::ScpiConfig;
//!
//! // RUST_SCPI_CONNECTION__RESOURCE=TCPIP::10.0.0.5::INSTR overrides the file
//! let config = ScpiConfig::load()?;
//! config.validate()?;
//! println!("Resource: {}", config.connection.resource);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::transport::Resource;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use scpi_core::{ScpiError, ScpiResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scpi.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScpiConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument connection settings
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Instrument connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Resource string, e.g. `TCPIP::192.168.1.20::INSTR` or `SIM`
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Per-call I/O timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Timeout for `*OPC?` synchronised operations
    #[serde(default = "default_opc_timeout", with = "humantime_serde")]
    pub opc_timeout: Duration,
    /// Appended to every command
    #[serde(default = "default_termination")]
    pub write_termination: String,
    /// Marks the end of a response; must be a single byte
    #[serde(default = "default_termination")]
    pub read_termination: String,
    /// Drain `SYST:ERR?` after every exchange
    #[serde(default = "default_query_status")]
    pub query_instrument_status: bool,
    /// Upper bound on error queue entries read per check
    #[serde(default = "default_max_error_queue")]
    pub max_error_queue: usize,
    /// Largest binary block accepted from the instrument, in bytes
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,
    /// Baud rate for serial resources without an explicit rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

// Default value functions
fn default_name() -> String {
    "rust-scpi".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_resource() -> String {
    "SIM".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_opc_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_termination() -> String {
    "\n".to_string()
}

fn default_query_status() -> bool {
    true
}

fn default_max_error_queue() -> usize {
    50
}

fn default_max_block_size() -> usize {
    64 * 1024 * 1024
}

fn default_baud_rate() -> u32 {
    9600
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            resource: default_resource(),
            timeout: default_timeout(),
            opc_timeout: default_opc_timeout(),
            write_termination: default_termination(),
            read_termination: default_termination(),
            query_instrument_status: default_query_status(),
            max_error_queue: default_max_error_queue(),
            max_block_size: default_max_block_size(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl ConnectionConfig {
    /// The read terminator as a single byte.
    pub fn read_terminator(&self) -> ScpiResult<u8> {
        match self.read_termination.as_bytes() {
            [b] => Ok(*b),
            _ => Err(ScpiError::Configuration(format!(
                "read_termination must be exactly one byte, got {:?}",
                self.read_termination
            ))),
        }
    }
}

impl ScpiConfig {
    /// Load from `config/scpi.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path; a missing file leaves the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ScpiConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RUST_SCPI_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScpiResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScpiError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(ScpiError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let conn = &self.connection;
        if conn.timeout.is_zero() || conn.opc_timeout.is_zero() {
            return Err(ScpiError::Configuration(
                "timeout and opc_timeout must be greater than zero".into(),
            ));
        }
        if conn.write_termination.is_empty() {
            return Err(ScpiError::Configuration(
                "write_termination must not be empty".into(),
            ));
        }
        conn.read_terminator()?;
        if conn.max_block_size == 0 {
            return Err(ScpiError::Configuration(
                "max_block_size must be positive".into(),
            ));
        }
        if conn.baud_rate == 0 {
            return Err(ScpiError::Configuration("baud_rate must be positive".into()));
        }

        conn.resource.parse::<Resource>()?;
        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> ScpiResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ScpiError::Configuration(format!("cannot serialize config: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_validate() {
        let config = ScpiConfig::default();
        assert_eq!(config.connection.resource, "SIM");
        assert_eq!(config.connection.timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scpi.toml",
                r#"
                [application]
                log_level = "debug"

                [connection]
                resource = "TCPIP::192.168.1.20::INSTR"
                timeout = "750ms"
                "#,
            )?;
            jail.set_env("RUST_SCPI_CONNECTION__QUERY_INSTRUMENT_STATUS", "false");

            let config = ScpiConfig::load_from("scpi.toml")?;
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.connection.resource, "TCPIP::192.168.1.20::INSTR");
            assert_eq!(config.connection.timeout, Duration::from_millis(750));
            assert_eq!(config.connection.opc_timeout, Duration::from_secs(30));
            assert!(!config.connection.query_instrument_status);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = ScpiConfig::load_from("does-not-exist.toml")?;
            assert_eq!(config, ScpiConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = ScpiConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_read_termination() {
        let mut config = ScpiConfig::default();
        config.connection.read_termination = "\r\n".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("read_termination"));
    }

    #[test]
    fn test_zero_block_limit_rejected() {
        let mut config = ScpiConfig::default();
        assert_eq!(config.connection.max_block_size, 64 * 1024 * 1024);
        config.connection.max_block_size = 0;
        assert!(matches!(config.validate(), Err(ScpiError::Configuration(_))));
    }

    #[test]
    fn test_invalid_resource() {
        let mut config = ScpiConfig::default();
        config.connection.resource = "GPIB0::7::INSTR".into();
        assert!(matches!(config.validate(), Err(ScpiError::Resource { .. })));
    }

    #[test]
    fn test_toml_rendering() {
        let rendered = ScpiConfig::default().to_toml_string().unwrap();
        assert!(rendered.contains("resource = \"SIM\""));
        assert!(rendered.contains("timeout = \"5s\""));
    }
}

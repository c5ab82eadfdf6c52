//! Bridge configuration.
//!
//! Values are layered, lowest precedence first:
//! - built-in defaults
//! - an optional TOML file
//! - environment variables (`MQTT_SERVER`, `MQTT_BASE_TOPIC`, `DEVICE_POLL_INTERVAL`, ...)

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{is_valid_device_id, DeviceId};

/// Environment variable naming the optional config file.
pub const CONFIG_PATH_ENV: &str = "EWPE_CONFIG";

/// Config file read when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "ewpe-bridge.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or a value had the wrong type.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Field name as used in the config file.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// More than one field failed validation.
    #[error("Multiple configuration errors: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Runtime configuration of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Broadcast address the device layer scans.
    pub network: String,

    /// MQTT server, e.g. `mqtt://127.0.0.1` or `broker.local:1884`.
    pub mqtt_server: String,

    /// MQTT port used when the server address carries none.
    pub mqtt_port: u16,

    /// MQTT username; empty means anonymous.
    pub mqtt_username: String,

    /// MQTT password.
    #[serde(skip_serializing)]
    pub mqtt_password: String,

    /// Prefix of every topic the bridge uses.
    pub mqtt_base_topic: String,

    /// Poll interval in milliseconds; `0` disables polling.
    pub device_poll_interval: u64,

    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Also write JSON logs to rolling files.
    pub log_to_file: bool,

    /// Directory for log files; a platform default when unset.
    pub log_dir: Option<PathBuf>,

    /// Comma separated device ids served by the in-memory fleet.
    pub simulated_devices: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            network: "192.168.1.255".to_string(),
            mqtt_server: "mqtt://127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: String::new(),
            mqtt_password: String::new(),
            mqtt_base_topic: "ewpe-smart".to_string(),
            device_poll_interval: 5000,
            log_level: "info".to_string(),
            log_to_file: false,
            log_dir: None,
            simulated_devices: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the file named by `EWPE_CONFIG` (or
    /// `ewpe-bridge.toml`, if present) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::from_sources(Some(&path), Environment::default())
    }

    /// Load configuration from an optional TOML file and an environment source.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn from_sources(file: Option<&Path>, environment: Environment) -> ConfigResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let config: Self = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every field, collecting all failures.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if let Err(message) = validate_base_topic(&self.mqtt_base_topic) {
            errors.push(ConfigError::ValidationError {
                field: "mqtt_base_topic",
                message,
            });
        }

        if self.network.parse::<Ipv4Addr>().is_err() {
            errors.push(ConfigError::ValidationError {
                field: "network",
                message: format!("'{}' is not an IPv4 address", self.network),
            });
        }

        if self.mqtt_server.trim().is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "mqtt_server",
                message: "must not be empty".to_string(),
            });
        }

        if self.mqtt_port == 0 {
            errors.push(ConfigError::ValidationError {
                field: "mqtt_port",
                message: "must be between 1 and 65535".to_string(),
            });
        }

        for id in self.simulated_device_entries() {
            if !is_valid_device_id(id) {
                errors.push(ConfigError::ValidationError {
                    field: "simulated_devices",
                    message: format!("'{id}' is not a 12 character hexadecimal device id"),
                });
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Poll interval, or `None` when polling is disabled.
    #[must_use]
    pub const fn poll_interval(&self) -> Option<Duration> {
        if self.device_poll_interval == 0 {
            None
        } else {
            Some(Duration::from_millis(self.device_poll_interval))
        }
    }

    /// Parsed simulated device ids. Invalid entries are skipped.
    #[must_use]
    pub fn simulated_device_ids(&self) -> Vec<DeviceId> {
        self.simulated_device_entries()
            .filter_map(|id| DeviceId::parse(id).ok())
            .collect()
    }

    fn simulated_device_entries(&self) -> impl Iterator<Item = &str> {
        self.simulated_devices
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Check that a base topic can prefix every bridge topic.
///
/// # Errors
///
/// Returns a description of the problem.
pub fn validate_base_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("must not be empty".to_string());
    }
    if topic.contains(['+', '#']) {
        return Err(format!("'{topic}' must not contain MQTT wildcards"));
    }
    if topic.starts_with('/') || topic.ends_with('/') {
        return Err(format!("'{topic}' must not start or end with '/'"));
    }
    Ok(())
}

//! Shared configuration for the cmdbus runtime and its binaries.
//!
//! Values resolve through `ortho_config` from four layers, lowest precedence
//! first: built-in defaults, an optional TOML file named by `--config-path`
//! or `CMDBUS_CONFIG_PATH`, `CMDBUS_*` environment variables, and
//! command-line flags. [`Config::resolve`] loads the layers and then checks
//! the values the runtime cannot work with.

mod defaults;
mod endpoint;
mod logging;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    DEFAULT_FANOUT_CAPACITY, DEFAULT_LOG_FILTER, DEFAULT_PERIODIC_INTERVAL, DEFAULT_PERIODIC_MS,
    DEFAULT_RECONNECT_BACKOFF, DEFAULT_RECONNECT_BACKOFF_MS, default_log_filter,
    default_log_format,
};
pub use endpoint::{EndpointParseError, RelayEndpoint};
pub use logging::{LogFormat, LogFormatParseError};

/// CLI flags recognised by the configuration loader.
///
/// Binaries that add flags of their own hand only these to the loader. Keep
/// the list in sync with the fields of [`Config`].
pub const CONFIG_CLI_FLAGS: &[&str] = &[
    "--config-path",
    "--log-filter",
    "--log-format",
    "--relay-server",
    "--relay-client",
    "--fanout-capacity",
    "--reconnect-backoff-ms",
    "--periodic-ms",
];

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CMDBUS")]
pub struct Config {
    /// `tracing` filter expression, for example `info` or `cmdbus=debug`.
    #[ortho_config(default = default_log_filter())]
    pub log_filter: String,
    /// Log output format (`json` or `compact`).
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Relay servers to bind next to the task, as `HOST:PORT`.
    #[ortho_config(cli_long = "relay-server")]
    #[serde(default)]
    pub relay_servers: Vec<RelayEndpoint>,
    /// Remote relay server to connect to instead of running a local task.
    pub relay_client: Option<RelayEndpoint>,
    /// Capacity of each relay session's outbound sub-queue.
    #[ortho_config(default = DEFAULT_FANOUT_CAPACITY)]
    pub fanout_capacity: usize,
    /// Milliseconds between relay client connection attempts.
    #[ortho_config(default = DEFAULT_RECONNECT_BACKOFF_MS)]
    pub reconnect_backoff_ms: u64,
    /// Milliseconds between `periodic` ticks.
    #[ortho_config(default = DEFAULT_PERIODIC_MS)]
    pub periodic_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            log_format: default_log_format(),
            relay_servers: Vec::new(),
            relay_client: None,
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            periodic_ms: DEFAULT_PERIODIC_MS,
        }
    }
}

impl Config {
    /// Resolves configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a layer fails to load or a resolved value
    /// is out of range.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from_iter(std::env::args_os())
    }

    /// Resolves configuration from an explicit argument list. The first item
    /// is the program name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a layer fails to load or a resolved value
    /// is out of range.
    pub fn resolve_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let config = Self::load_from_iter(args).map_err(ConfigError::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotPositive`] naming the first zero setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("fanout_capacity", self.fanout_capacity == 0),
            ("reconnect_backoff_ms", self.reconnect_backoff_ms == 0),
            ("periodic_ms", self.periodic_ms == 0),
        ];
        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(ConfigError::NotPositive { field }),
            None => Ok(()),
        }
    }

    /// Returns the configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Returns the configured log format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Pause between relay client connection attempts.
    #[must_use]
    pub const fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    /// Interval between `periodic` ticks.
    #[must_use]
    pub const fn periodic_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_ms)
    }
}

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Arguments, environment or the configuration file were rejected.
    #[error("failed to load configuration: {0}")]
    Load(#[source] Arc<OrthoError>),
    /// A numeric setting that must be positive resolved to zero.
    #[error("configuration value '{field}' must be greater than zero")]
    NotPositive {
        /// Name of the offending setting.
        field: &'static str,
    },
}

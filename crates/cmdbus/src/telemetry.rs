//! Structured telemetry initialisation for cmdbus processes.
//!
//! A topology runs as many threads: the task, the foreground consumer, one
//! accept loop and one distributor per relay server, and a reader plus a
//! writer for every relay session. Each is spawned with a name from
//! [`thread_name`] (`cmdbus-task`, `cmdbus-relay-accept`,
//! `cmdbus-session-7-reader`, ...) and the subscriber prints that name on
//! every line. The number in a session thread's name is the `session` field
//! of the relay lifecycle events, so a dropped message or a closed socket
//! can be traced back to the peer that opened the session.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use cmdbus_config::{Config, LogFormat};

/// Prefix shared by the names of all runtime threads.
pub const THREAD_PREFIX: &str = env!("CARGO_PKG_NAME");

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Name for a runtime thread playing `role`, such as `task` or
/// `session-3-writer`.
#[must_use]
pub fn thread_name(role: &str) -> String {
    format!("{THREAD_PREFIX}-{role}")
}

/// Installs the global tracing subscriber on first use.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the
/// global state, so tests and binaries may both call it.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter does not parse or another
/// subscriber was installed outside this function.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn parse_filter(config: &Config) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = parse_filter(config)?;

    // Thread ids are opaque and change between runs; the names identify the
    // participant.
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

//! Simulated motor demonstration for the cmdbus runtime.
//!
//! The motor task accepts `MOVE <float>` and `SIMUL <int>` and reports
//! `MOVING`, `POS` and `SIMULATED` on every periodic tick. A terminal console
//! renders the reports and forwards typed commands. Relay servers expose the
//! task over TCP, and a relay client lets the console drive a remote motor.

use std::ffi::OsString;
use std::io::{self, BufReader, Write};
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::{error, info};

use cmdbus::telemetry::{self, TelemetryError};
use cmdbus::{LaunchError, Launcher};
use cmdbus_config::{Config, ConfigError};

mod cli;
pub mod console;
pub mod motor;
mod signals;

use cli::Cli;
use signals::SignalWatcher;

const MOTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::motor");

/// Errors that end the demonstration with a failure exit code.
#[derive(Debug, Error)]
pub enum MotorError {
    /// Arguments could not be parsed.
    #[error(transparent)]
    Arguments(#[from] clap::Error),
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Logging could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {source}")]
    Signals {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The launcher refused the topology or a participant failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Runs the demonstration and maps the outcome to an exit code.
///
/// Help and version requests are written to `stderr` and succeed.
pub fn run<I, E>(args: I, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    E: Write,
{
    match try_run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(MotorError::Arguments(error)) if !error.use_stderr() => {
            if write!(stderr, "{error}").is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            // Nothing more can be reported when stderr itself is gone.
            drop(writeln!(stderr, "cmdbus-motor: {error}"));
            ExitCode::FAILURE
        }
    }
}

fn try_run<I>(args: I) -> Result<(), MotorError>
where
    I: IntoIterator<Item = OsString>,
{
    let split = cli::split_arguments(args);
    let headless = Cli::try_parse_from(split.motor)?.headless;
    let config = Config::resolve_from_iter(split.config)?;
    telemetry::initialise(&config)?;

    let launcher = build_launcher(&config, headless);
    let _signals = SignalWatcher::install(launcher.shutdown_token().clone())
        .map_err(|source| MotorError::Signals { source })?;
    info!(
        target: MOTOR_TARGET,
        headless,
        servers = config.relay_servers.len(),
        client = config.relay_client.is_some(),
        "starting motor demonstration"
    );
    launcher.run()?;
    Ok(())
}

/// Builds the launcher for `config`.
///
/// With a relay client the console drives the remote task and no local motor
/// runs. Otherwise the motor runs locally, with the console unless
/// `headless` is set.
#[must_use]
pub fn build_launcher(config: &Config, headless: bool) -> Launcher {
    let mut launcher = Launcher::from_config(config);
    if config.relay_client.is_none() {
        let period = config.periodic_interval();
        launcher = launcher.task(move |endpoint| motor::run_motor(endpoint, period));
    }
    if !headless || config.relay_client.is_some() {
        launcher = launcher.consumer(|endpoint| {
            let input = BufReader::new(io::stdin());
            if let Err(source) = console::run_console(&endpoint, input, io::stdout()) {
                error!(target: MOTOR_TARGET, error = %source, "console failed to start");
                endpoint.shutdown().trigger();
            }
        });
    }
    launcher
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use cmdbus::ConfigurationError;
    use cmdbus_config::RelayEndpoint;

    use super::*;

    fn config_with(servers: &[u16], client: Option<u16>) -> Config {
        Config {
            relay_servers: servers
                .iter()
                .map(|port| RelayEndpoint::new("127.0.0.1", *port))
                .collect(),
            relay_client: client.map(|port| RelayEndpoint::new("127.0.0.1", port)),
            ..Config::default()
        }
    }

    #[rstest]
    #[case(config_with(&[], None), false)]
    #[case(config_with(&[], None), true)]
    #[case(config_with(&[0], None), true)]
    #[case(config_with(&[], Some(3333)), false)]
    #[case(config_with(&[], Some(3333)), true)]
    fn builds_valid_topologies(#[case] config: Config, #[case] headless: bool) {
        assert_eq!(build_launcher(&config, headless).validate(), Ok(()));
    }

    #[test]
    fn relay_client_with_servers_is_rejected() {
        let config = config_with(&[0], Some(3333));
        assert_eq!(
            build_launcher(&config, true).validate(),
            Err(ConfigurationError::ServersWithoutTask)
        );
    }

    #[test]
    fn help_succeeds() {
        let mut stderr = Vec::new();
        let code = run([OsString::from("cmdbus-motor"), "--help".into()], &mut stderr);
        assert_eq!(code, ExitCode::SUCCESS);
        let help = String::from_utf8_lossy(&stderr);
        assert!(help.contains("--headless"));
        assert!(help.contains("--relay-server"));
    }

    #[test]
    fn malformed_flags_fail() {
        let mut stderr = Vec::new();
        let code = run(
            [OsString::from("cmdbus-motor"), "--fanout-capacity".into(), "0".into()],
            &mut stderr,
        );
        assert_eq!(code, ExitCode::FAILURE);
        assert!(String::from_utf8_lossy(&stderr).contains("fanout_capacity"));
    }
}

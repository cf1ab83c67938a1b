//! Command-line surface of the motor demonstration.
//!
//! Configuration flags belong to the `cmdbus-config` loader; everything else
//! is parsed here. [`split_arguments`] routes each token to its parser so the
//! two can be mixed freely on one command line.

use std::ffi::{OsStr, OsString};

use clap::Parser;

use cmdbus_config::CONFIG_CLI_FLAGS;

const CONFIGURATION_HELP: &str = "\
Configuration:
      --config-path <PATH>          Reads settings from a TOML file [env: CMDBUS_CONFIG_PATH]
      --log-filter <FILTER>         Log filter expression [env: CMDBUS_LOG_FILTER]
      --log-format <FORMAT>         json or compact [env: CMDBUS_LOG_FORMAT]
      --relay-server <HOST:PORT>    Binds a relay server, repeatable [env: CMDBUS_RELAY_SERVERS]
      --relay-client <HOST:PORT>    Drives a remote motor [env: CMDBUS_RELAY_CLIENT]
      --fanout-capacity <MESSAGES>  Per-session outbound queue size [env: CMDBUS_FANOUT_CAPACITY]
      --reconnect-backoff-ms <MS>   Pause between relay connection attempts [env: CMDBUS_RECONNECT_BACKOFF_MS]
      --periodic-ms <MS>            Interval between status reports [env: CMDBUS_PERIODIC_MS]";

/// Simulated motor driven through a cmdbus console or TCP relays.
#[derive(Debug, Parser)]
#[command(name = "cmdbus-motor", version, about, after_help = CONFIGURATION_HELP)]
pub(crate) struct Cli {
    /// Runs the motor task without the local console.
    #[arg(long, env = "CMDBUS_HEADLESS")]
    pub(crate) headless: bool,
}

/// Command line divided between the configuration loader and [`Cli`]. Both
/// halves start with the program name.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ArgumentSplit {
    pub(crate) config: Vec<OsString>,
    pub(crate) motor: Vec<OsString>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagAction {
    Include { needs_value: bool },
    Skip,
}

fn classify(argument: &OsStr) -> FlagAction {
    let text = argument.to_string_lossy();
    if !text.starts_with("--") {
        return FlagAction::Skip;
    }
    let (flag, has_inline_value) = match text.split_once('=') {
        Some((flag, _)) => (flag, true),
        None => (&*text, false),
    };
    if CONFIG_CLI_FLAGS.contains(&flag) {
        FlagAction::Include {
            needs_value: !has_inline_value,
        }
    } else {
        FlagAction::Skip
    }
}

/// Routes configuration flags and their values to the loader and leaves the
/// remaining tokens for [`Cli`].
pub(crate) fn split_arguments<I>(args: I) -> ArgumentSplit
where
    I: IntoIterator<Item = OsString>,
{
    let mut tokens = args.into_iter();
    let program = tokens
        .next()
        .unwrap_or_else(|| OsString::from("cmdbus-motor"));
    let mut split = ArgumentSplit {
        config: vec![program.clone()],
        motor: vec![program],
    };

    while let Some(token) = tokens.next() {
        match classify(&token) {
            FlagAction::Include { needs_value } => {
                split.config.push(token);
                if needs_value && let Some(value) = tokens.next() {
                    split.config.push(value);
                }
            }
            FlagAction::Skip => split.motor.push(token),
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case(&["cmdbus-motor"], false)]
    #[case(&["cmdbus-motor", "--headless"], true)]
    fn parses_headless_flag(#[case] args: &[&str], #[case] headless: bool) {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        assert_eq!(cli.headless, headless);
    }

    #[test]
    fn routes_configuration_flags_to_the_loader() {
        let split = split_arguments(os(&[
            "cmdbus-motor",
            "--relay-server",
            "127.0.0.1:3333",
            "--headless",
            "--periodic-ms=100",
        ]));
        assert_eq!(
            split.config,
            os(&[
                "cmdbus-motor",
                "--relay-server",
                "127.0.0.1:3333",
                "--periodic-ms=100"
            ])
        );
        assert_eq!(split.motor, os(&["cmdbus-motor", "--headless"]));
    }

    #[test]
    fn unknown_flags_stay_with_the_motor_parser() {
        let split = split_arguments(os(&["cmdbus-motor", "--verbose", "--help"]));
        assert_eq!(split.config, os(&["cmdbus-motor"]));
        assert_eq!(split.motor, os(&["cmdbus-motor", "--verbose", "--help"]));
    }

    #[test]
    fn dangling_flag_is_left_for_the_loader_to_reject() {
        let split = split_arguments(os(&["cmdbus-motor", "--relay-client"]));
        assert_eq!(split.config, os(&["cmdbus-motor", "--relay-client"]));
    }
}

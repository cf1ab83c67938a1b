//! Entry point for the simulated motor demonstration.
//!
//! The binary delegates to [`cmdbus_motor::run`], which resolves
//! configuration, installs logging and signal handlers, and launches the
//! motor task with a terminal console.

use std::io::{self, StderrLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    cmdbus_motor::run(std::env::args_os(), &mut stderr)
}

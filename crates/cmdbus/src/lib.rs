//! Line-oriented command bus with TCP relays.
//!
//! A long-running task and a foreground consumer exchange newline-terminated
//! `VERB [ARGUMENT]` messages through a pair of [`FramedQueue`]s. Each side
//! runs a [`CommandLoop`] that dispatches verbs to registered handlers. Relay
//! servers expose the task to remote consumers, and a relay client lets a
//! consumer drive a task on another host. The [`Launcher`] wires these
//! pieces together and owns startup and shutdown.
//!
//! ```no_run
//! use cmdbus::{CommandLoop, Dispatcher, Launcher, Validator};
//!
//! # fn main() -> Result<(), cmdbus::LaunchError> {
//! Launcher::new()
//!     .task(|endpoint| {
//!         let mut dispatcher = Dispatcher::new();
//!         dispatcher.register_with("move", Validator::float(), |position: &mut f64, target| {
//!             *position = target.unwrap_or(*position);
//!             Ok(())
//!         });
//!         let _final_position = CommandLoop::new(endpoint, 0.0_f64, dispatcher).run();
//!     })
//!     .consumer(|endpoint| {
//!         for line in ["MOVE 10.0", "quit"] {
//!             if endpoint.send(line).is_err() {
//!                 break;
//!             }
//!         }
//!     })
//!     .run()
//! # }
//! ```

#[cfg(not(unix))]
compile_error!("cmdbus relies on Unix socket pairs and poll(2)");

pub mod dispatch;
pub mod launcher;
pub mod message;
pub mod queue;
pub mod relay;
pub mod runtime;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use dispatch::{DispatchError, Dispatcher, Validator};
pub use launcher::{ConfigurationError, LaunchError, Launcher};
pub use message::{Command, Message, PERIODIC_VERB, QUIT_VERB};
pub use queue::{FanOut, FramedQueue, MessageSink, MessageSource, QueueError};
pub use relay::{
    ClientExit, RelayClient, RelayError, RelayReporter, RelayServer, RelayServerHandle,
    StructuredRelayReporter,
};
pub use runtime::{CommandLoop, Endpoint, Shutdown};

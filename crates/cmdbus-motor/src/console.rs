//! Terminal consumer: prints motor status and forwards typed commands.

use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use cmdbus::telemetry::thread_name;
use cmdbus::{Command, CommandLoop, Dispatcher, Endpoint, QUIT_VERB, Validator};

use crate::MOTOR_TARGET;

const INPUT_POLL: Duration = Duration::from_millis(100);

/// Latest motor status as seen by the console.
#[derive(Debug)]
pub struct ConsoleView<W> {
    output: W,
    moving: bool,
    position: f64,
    simulated: bool,
}

impl<W: Write> ConsoleView<W> {
    /// Creates a view rendering to `output`.
    #[must_use]
    pub const fn new(output: W) -> Self {
        Self {
            output,
            moving: false,
            position: 0.0,
            simulated: false,
        }
    }

    /// Writes the current snapshot as one line.
    fn render(&mut self) -> io::Result<()> {
        let state = if self.moving { "moving" } else { "idle" };
        let driver = if self.simulated {
            "simulated"
        } else {
            "hardware"
        };
        writeln!(
            self.output,
            "position {:>12.3}  {state:<6}  {driver}",
            self.position
        )?;
        self.output.flush()
    }
}

/// Handlers for the status lines emitted by the motor task.
///
/// `SIMULATED` closes each status group, so it triggers the redraw.
#[must_use]
pub fn view_dispatcher<W>() -> Dispatcher<ConsoleView<W>>
where
    W: Write + 'static,
{
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .register_with("moving", Validator::integer(), |view: &mut ConsoleView<W>, flag| {
            view.moving = flag.is_some_and(|flag| flag != 0);
            Ok(())
        })
        .register_with("pos", Validator::float(), |view: &mut ConsoleView<W>, position| {
            view.position = position.unwrap_or(view.position);
            Ok(())
        })
        .register_with("simulated", Validator::integer(), |view: &mut ConsoleView<W>, flag| {
            view.simulated = flag.is_some_and(|flag| flag != 0);
            view.render()?;
            Ok(())
        });
    dispatcher
}

/// Runs the console until `quit` is typed, input ends or shutdown fires.
///
/// Status lines are rendered by a command loop on a helper thread while
/// this thread forwards input lines to the task.
///
/// # Errors
///
/// Returns an error when a helper thread cannot be spawned.
pub fn run_console<R, W>(endpoint: &Endpoint, input: R, output: W) -> io::Result<()>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let view = {
        let endpoint = endpoint.clone();
        thread::Builder::new()
            .name(thread_name("console-view"))
            .spawn(move || {
                let view_loop =
                    CommandLoop::new(endpoint, ConsoleView::new(output), view_dispatcher());
                drop(view_loop.run());
            })?
    };

    let (lines, received) = mpsc::channel();
    // Detached: a read blocked on the terminal cannot be interrupted.
    let input_thread = thread::Builder::new()
        .name(thread_name("console-input"))
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else { break };
                if lines.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(error) = input_thread {
        endpoint.send_to_self(QUIT_VERB);
        drop(view.join());
        return Err(error);
    }

    forward_input(endpoint, &received);

    endpoint.send_to_self(QUIT_VERB);
    if view.join().is_err() {
        warn!(target: MOTOR_TARGET, "console view panicked");
    }
    Ok(())
}

fn forward_input(endpoint: &Endpoint, received: &mpsc::Receiver<String>) {
    let shutdown = endpoint.shutdown();
    loop {
        match received.recv_timeout(INPUT_POLL) {
            Ok(line) => {
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if command.is(QUIT_VERB) {
                    debug!(target: MOTOR_TARGET, "quit typed at the console");
                    return;
                }
                if let Err(error) = endpoint.send(&line) {
                    warn!(target: MOTOR_TARGET, %error, "failed to forward console input");
                    return;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if shutdown.is_triggered() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(target: MOTOR_TARGET, "console input closed");
                return;
            }
        }
    }
}

//! Motor task: a driver abstraction, a simulated driver and the command
//! handlers exposed on the bus.

use std::time::Duration;

use tracing::info;

use cmdbus::{CommandLoop, Dispatcher, Endpoint, Validator};

use crate::MOTOR_TARGET;

/// Largest distance the simulated motor covers in one tick.
const MAX_STEP: f64 = 10.0;
/// Distance under which the simulated motor snaps onto its target.
const PRECISION: f64 = 0.01;

/// Snapshot reported by a driver on every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorStatus {
    /// True while the motor has not reached its target.
    pub moving: bool,
    /// Current position.
    pub position: f64,
}

/// Hardware abstraction used by [`Motor`].
pub trait MotorDriver: Send {
    /// Sets a new target position.
    fn move_to(&mut self, target: f64);

    /// Advances the driver by one tick and reports its state.
    fn query(&mut self) -> MotorStatus;
}

/// Motor that moves half of the remaining distance on every query.
#[derive(Debug, Default, Clone)]
pub struct SimulatedMotor {
    position: f64,
    target: f64,
}

impl MotorDriver for SimulatedMotor {
    fn move_to(&mut self, target: f64) {
        self.target = target;
    }

    #[expect(
        clippy::float_cmp,
        reason = "the simulated motor snaps exactly onto its target"
    )]
    fn query(&mut self) -> MotorStatus {
        let moving = self.position != self.target;
        if moving {
            let step = (self.target - self.position) / 2.0;
            if step.abs() < PRECISION {
                self.position = self.target;
            } else {
                self.position += step.clamp(-MAX_STEP, MAX_STEP);
            }
        }
        MotorStatus {
            moving,
            position: self.position,
        }
    }
}

/// Placeholder for a real motor controller. It never moves.
#[derive(Debug, Default, Clone, Copy)]
pub struct HardwareMotor;

impl MotorDriver for HardwareMotor {
    fn move_to(&mut self, _target: f64) {}

    fn query(&mut self) -> MotorStatus {
        MotorStatus {
            moving: false,
            position: 0.0,
        }
    }
}

/// State owned by the motor task's command loop.
pub struct Motor {
    driver: Box<dyn MotorDriver>,
    simulated: bool,
}

impl Default for Motor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor {
    /// Creates a motor backed by the simulated driver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            driver: Box::new(SimulatedMotor::default()),
            simulated: true,
        }
    }

    /// True when the simulated driver is active.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// Switches between the simulated and the hardware driver. Switching to
    /// the mode already active keeps the current driver.
    pub fn set_simulated(&mut self, simulated: bool) {
        if simulated == self.simulated {
            return;
        }
        self.driver = if simulated {
            Box::new(SimulatedMotor::default())
        } else {
            Box::new(HardwareMotor)
        };
        self.simulated = simulated;
        info!(target: MOTOR_TARGET, simulated, "motor driver switched");
    }

    /// Sets a new target position.
    pub fn move_to(&mut self, target: f64) {
        self.driver.move_to(target);
    }

    /// Advances the driver and renders the three status lines.
    pub fn refresh(&mut self) -> [String; 3] {
        let status = self.driver.query();
        [
            format!("MOVING {}", u8::from(status.moving)),
            format!("POS {:.6}", status.position),
            format!("SIMULATED {}", u8::from(self.simulated)),
        ]
    }
}

/// Registers `MOVE`, `SIMUL` and the periodic status report.
#[must_use]
pub fn motor_dispatcher(outbox: Endpoint) -> Dispatcher<Motor> {
    let mut dispatcher = Dispatcher::new();
    dispatcher
        .register_with("move", Validator::float(), |motor: &mut Motor, target| {
            let target = target.ok_or_else(|| anyhow::anyhow!("MOVE needs a target position"))?;
            motor.move_to(target);
            Ok(())
        })
        .register_with("simul", Validator::integer(), |motor: &mut Motor, enable| {
            let enable = enable.ok_or_else(|| anyhow::anyhow!("SIMUL needs 0 or 1"))?;
            motor.set_simulated(enable != 0);
            Ok(())
        })
        .register("periodic", move |motor: &mut Motor, _| {
            for line in motor.refresh() {
                outbox.send(&line)?;
            }
            Ok(())
        });
    dispatcher
}

/// Runs the motor task on `endpoint` until `quit`, ticking every `period`.
pub fn run_motor(endpoint: Endpoint, period: Duration) {
    let dispatcher = motor_dispatcher(endpoint.clone());
    let motor = CommandLoop::new(endpoint, Motor::new(), dispatcher)
        .with_period(period)
        .run();
    info!(
        target: MOTOR_TARGET,
        simulated = motor.is_simulated(),
        "motor task stopped"
    );
}

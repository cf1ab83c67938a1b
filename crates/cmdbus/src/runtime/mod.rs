//! Command loops, endpoints and the shutdown token that ties them together.

mod command_loop;
mod endpoint;
mod shutdown;

pub use self::command_loop::CommandLoop;
pub use self::endpoint::Endpoint;
pub use self::shutdown::Shutdown;

const RUNTIME_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::runtime");

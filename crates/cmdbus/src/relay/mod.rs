//! TCP relays bridging command queues across processes and hosts.
//!
//! A [`RelayServer`] sits next to the task: every connected client feeds the
//! task's inbox and receives a copy of everything the task sends. A
//! [`RelayClient`] sits next to a remote consumer and keeps one connection to
//! such a server alive. Both speak newline-delimited UTF-8.

mod client;
mod errors;
mod framing;
mod reporter;
mod server;
mod session;

use std::net::{SocketAddr, ToSocketAddrs};

use cmdbus_config::RelayEndpoint;

pub use self::client::{ClientExit, RelayClient};
pub use self::errors::RelayError;
pub use self::framing::MAX_LINE_BYTES;
pub use self::reporter::{RelayReporter, StructuredRelayReporter};
pub use self::server::{RelayServer, RelayServerHandle};

const RELAY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::relay");

fn resolve(endpoint: &RelayEndpoint) -> Result<SocketAddr, RelayError> {
    let mut addrs = (endpoint.host(), endpoint.port())
        .to_socket_addrs()
        .map_err(|source| RelayError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?;
    addrs.next().ok_or_else(|| RelayError::ResolveEmpty {
        endpoint: endpoint.to_string(),
    })
}

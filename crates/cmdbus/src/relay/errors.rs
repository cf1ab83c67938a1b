//! Error types for relay servers and clients.

use std::io;
use std::net::SocketAddr;

use nix::errno::Errno;
use thiserror::Error;

use crate::queue::QueueError;

/// Errors surfaced while binding, running or joining a relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Host name resolution failed.
    #[error("failed to resolve relay endpoint {endpoint}: {source}")]
    Resolve {
        /// Endpoint as written in configuration.
        endpoint: String,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no usable address.
    #[error("no TCP addresses resolved for {endpoint}")]
    ResolveEmpty {
        /// Endpoint as written in configuration.
        endpoint: String,
    },
    /// The listening socket could not be bound.
    #[error("failed to bind relay server at {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Socket options could not be applied.
    #[error("failed to configure relay socket: {source}")]
    Socket {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The local outbound queue could not provide a readiness descriptor.
    #[error("failed to watch local outbound queue: {source}")]
    Readiness {
        /// Queue error.
        #[source]
        source: QueueError,
    },
    /// `poll(2)` failed with something other than an interruption.
    #[error("relay poll failed: {source}")]
    Poll {
        /// Error number reported by the kernel.
        #[source]
        source: Errno,
    },
    /// A relay thread could not be spawned.
    #[error("failed to spawn relay thread '{thread}': {source}")]
    Spawn {
        /// Thread name.
        thread: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A relay thread panicked.
    #[error("relay thread '{thread}' panicked")]
    ThreadPanic {
        /// Thread name.
        thread: &'static str,
    },
}

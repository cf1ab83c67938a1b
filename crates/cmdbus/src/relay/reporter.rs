//! Structured reporting for relay connection lifecycle events.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use cmdbus_config::RelayEndpoint;

use super::RELAY_TARGET;

/// Observer for relay connection events.
pub trait RelayReporter: Send + Sync {
    /// A relay client is about to connect.
    fn connect_attempt(&self, endpoint: &RelayEndpoint, attempt: u64);

    /// A relay client connected.
    fn connected(&self, endpoint: &RelayEndpoint, peer: SocketAddr);

    /// A connection attempt failed.
    fn connect_failed(&self, endpoint: &RelayEndpoint, error: &io::Error);

    /// An established client connection was lost.
    fn disconnected(&self, endpoint: &RelayEndpoint, reason: &str);

    /// A relay server accepted a session.
    fn session_opened(&self, session: u64, peer: SocketAddr);

    /// A relay server session ended.
    fn session_closed(&self, session: u64, peer: SocketAddr);
}

impl<T> RelayReporter for Arc<T>
where
    T: RelayReporter + ?Sized,
{
    fn connect_attempt(&self, endpoint: &RelayEndpoint, attempt: u64) {
        (**self).connect_attempt(endpoint, attempt);
    }

    fn connected(&self, endpoint: &RelayEndpoint, peer: SocketAddr) {
        (**self).connected(endpoint, peer);
    }

    fn connect_failed(&self, endpoint: &RelayEndpoint, error: &io::Error) {
        (**self).connect_failed(endpoint, error);
    }

    fn disconnected(&self, endpoint: &RelayEndpoint, reason: &str) {
        (**self).disconnected(endpoint, reason);
    }

    fn session_opened(&self, session: u64, peer: SocketAddr) {
        (**self).session_opened(session, peer);
    }

    fn session_closed(&self, session: u64, peer: SocketAddr) {
        (**self).session_closed(session, peer);
    }
}

/// Default reporter that records relay events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredRelayReporter;

impl StructuredRelayReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RelayReporter for StructuredRelayReporter {
    fn connect_attempt(&self, endpoint: &RelayEndpoint, attempt: u64) {
        tracing::debug!(
            target: RELAY_TARGET,
            event = "connect_attempt",
            endpoint = %endpoint,
            attempt,
            "connecting to relay server"
        );
    }

    fn connected(&self, endpoint: &RelayEndpoint, peer: SocketAddr) {
        tracing::info!(
            target: RELAY_TARGET,
            event = "connected",
            endpoint = %endpoint,
            peer = %peer,
            "relay client connected"
        );
    }

    fn connect_failed(&self, endpoint: &RelayEndpoint, error: &io::Error) {
        tracing::warn!(
            target: RELAY_TARGET,
            event = "connect_failed",
            endpoint = %endpoint,
            error = %error,
            "relay connection attempt failed"
        );
    }

    fn disconnected(&self, endpoint: &RelayEndpoint, reason: &str) {
        tracing::warn!(
            target: RELAY_TARGET,
            event = "disconnected",
            endpoint = %endpoint,
            reason,
            "relay client lost its connection"
        );
    }

    fn session_opened(&self, session: u64, peer: SocketAddr) {
        tracing::info!(
            target: RELAY_TARGET,
            event = "session_opened",
            session,
            peer = %peer,
            "relay session opened"
        );
    }

    fn session_closed(&self, session: u64, peer: SocketAddr) {
        tracing::info!(
            target: RELAY_TARGET,
            event = "session_closed",
            session,
            peer = %peer,
            "relay session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tracing::Subscriber;
    use tracing_subscriber::Registry;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    struct TargetLog(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for TargetLog {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            self.0
                .lock()
                .expect("target log poisoned")
                .push(event.metadata().target().to_owned());
        }
    }

    #[test]
    fn events_use_the_crate_relay_target() {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(TargetLog(Arc::clone(&targets)));
        let endpoint = RelayEndpoint::new("127.0.0.1", 3333);
        let peer = SocketAddr::from(([127, 0, 0, 1], 40_000));

        tracing::subscriber::with_default(subscriber, || {
            let reporter = StructuredRelayReporter::new();
            reporter.connect_attempt(&endpoint, 1);
            reporter.connected(&endpoint, peer);
            let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
            reporter.connect_failed(&endpoint, &refused);
            reporter.disconnected(&endpoint, "eof");
            reporter.session_opened(1, peer);
            reporter.session_closed(1, peer);
        });

        let targets = targets.lock().expect("target log poisoned");
        assert_eq!(targets.len(), 6);
        assert!(
            targets.iter().all(|target| target == RELAY_TARGET),
            "unexpected targets: {targets:?}"
        );
        assert_eq!(RELAY_TARGET, "cmdbus::relay");
    }
}

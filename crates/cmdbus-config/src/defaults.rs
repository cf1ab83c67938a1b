use std::time::Duration;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default capacity of each relay session's outbound sub-queue.
pub const DEFAULT_FANOUT_CAPACITY: usize = 256;

/// Default pause between relay client connection attempts, in milliseconds.
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Default pause between relay client connection attempts.
pub const DEFAULT_RECONNECT_BACKOFF: Duration =
    Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS);

/// Default interval between `periodic` ticks, in milliseconds.
pub const DEFAULT_PERIODIC_MS: u64 = 500;

/// Default interval between `periodic` ticks injected into a command loop.
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_millis(DEFAULT_PERIODIC_MS);

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

//! Configuration for dispatchers and the socket transport.

use std::time::Duration;

use crate::wire::MAX_PAYLOAD_SIZE;

/// Environment variable overriding [`DispatcherConfig::completion_workers`].
pub const ENV_COMPLETION_WORKERS: &str = "LANTERN_COMPLETION_WORKERS";

/// Environment variable overriding [`DispatcherConfig::max_outstanding_calls`].
pub const ENV_MAX_OUTSTANDING_CALLS: &str = "LANTERN_MAX_OUTSTANDING_CALLS";

/// Configuration shared by every dispatcher a registry builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of completion workers resolving caller futures.
    ///
    /// Resolution never runs on the transport's read task; it is queued to one
    /// of these workers. Values below 1 are treated as 1.
    pub completion_workers: usize,

    /// Upper bound on calls awaiting a response. `None` means unbounded.
    pub max_outstanding_calls: Option<usize>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            completion_workers: 2,
            max_outstanding_calls: None,
        }
    }
}

impl DispatcherConfig {
    /// Set the number of completion workers.
    pub fn with_completion_workers(mut self, workers: usize) -> Self {
        self.completion_workers = workers.max(1);
        self
    }

    /// Cap the number of outstanding calls.
    pub fn with_max_outstanding_calls(mut self, limit: usize) -> Self {
        self.max_outstanding_calls = Some(limit);
        self
    }

    /// Defaults, overridden by `LANTERN_COMPLETION_WORKERS` and
    /// `LANTERN_MAX_OUTSTANDING_CALLS` when they hold positive integers.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = env_usize(ENV_COMPLETION_WORKERS) {
            config.completion_workers = workers;
        }
        if let Some(limit) = env_usize(ENV_MAX_OUTSTANDING_CALLS) {
            config.max_outstanding_calls = Some(limit);
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}

/// Configuration for the framed socket transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    /// Timeout for the initial connection attempt.
    pub connect_timeout: Duration,

    /// Size of each read from the socket.
    pub read_buffer_size: usize,

    /// Largest payload accepted in either direction.
    pub max_payload_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_buffer_size: 8 * 1024,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl SocketConfig {
    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the largest accepted payload.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Configuration for low-latency local networking.
    pub fn local_network() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            read_buffer_size: 4 * 1024,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }

    /// Configuration for high-latency WAN networking.
    pub fn wan_network() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_buffer_size: 64 * 1024,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

use std::time::Duration;

/// Selects how deliveries are executed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DispatchMode {
    /// Run each delivery on the caller's task and return its error.
    #[default]
    Immediate,
    /// Queue deliveries for a single background worker.
    Deferred,
}

/// Configures HTTP timeout, delivery queue and shutdown behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of pending deliveries before new ones are dropped.
    pub queue_capacity: usize,
    /// Upper bound in milliseconds on the drain wait at shutdown.
    pub shutdown_timeout_ms: u64,
    /// Backoff unit in milliseconds, multiplied by the number of
    /// consecutive failures to delay the next attempt.
    pub backoff_ms: u64,
    /// Immediate or deferred execution of deliveries.
    pub dispatch: DispatchMode,
    /// Log every outbound request at debug level.
    pub debug: bool,
}

impl ClientOptions {
    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            queue_capacity: 100,
            shutdown_timeout_ms: 10_000,
            backoff_ms: 1_000,
            dispatch: DispatchMode::Immediate,
            debug: false,
        }
    }
}

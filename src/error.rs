/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum BitcasterError {
    /// Malformed endpoint, missing credentials or no async runtime.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Token rejected by the server (HTTP 401/403).
    #[error("invalid token ({status}): {url}")]
    Authentication { status: u16, url: String },
    /// Target stream does not exist (HTTP 404).
    #[error("stream not found: {url}")]
    StreamNotFound { url: String },
    /// Payload rejected by the server (any other 4xx).
    #[error("validation error {status}: {body}")]
    Validation { status: u16, body: String },
    /// Too many requests (HTTP 429).
    #[error("rate limited: {body}")]
    RateLimited { body: String },
    /// Server-side failure (HTTP 5xx).
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    /// Status outside of the accepted 200/201 that fits no other class.
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
    /// Bounded delivery queue is saturated; the task was not accepted.
    #[error("delivery queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
    /// Background worker is draining or stopped and takes no new tasks.
    #[error("delivery worker is not accepting tasks")]
    WorkerStopped,
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl BitcasterError {
    /// Returns `true` when the failure is likely to go away on retry.
    ///
    /// The background worker re-enqueues tasks failing with a transient
    /// error and drops everything else.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => is_retryable_transport(err),
            Self::Server { .. } | Self::RateLimited { .. } => true,
            Self::Configuration(_)
            | Self::Authentication { .. }
            | Self::StreamNotFound { .. }
            | Self::Validation { .. }
            | Self::UnexpectedStatus { .. }
            | Self::QueueFull { .. }
            | Self::WorkerStopped
            | Self::Decode(_) => false,
        }
    }

    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status, .. }
            | Self::Validation { status, .. }
            | Self::Server { status, .. }
            | Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::StreamNotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            Self::Configuration(_)
            | Self::QueueFull { .. }
            | Self::WorkerStopped
            | Self::Decode(_) => None,
        }
    }
}

fn is_retryable_transport(err: &reqwest::Error) -> bool {
    // Builder errors (bad URL, bad header) are programming errors and would
    // fail identically on every attempt.
    !err.is_builder()
        && (err.is_connect() || err.is_timeout() || err.is_request() || err.is_body())
}

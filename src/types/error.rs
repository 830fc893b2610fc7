use http::StatusCode;
use thiserror::Error;

/// Possible errors when queueing, dispatching, or persisting requests
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The run was started with nothing queued.
    ///
    /// The queue is consumed by every run, so this also fires when a runner
    /// is re-run without re-enqueueing.
    #[error("Nothing to run: no requests were enqueued")]
    EmptyQueue,
    /// A request was constructed with a concurrency limit of zero
    #[error("Invalid concurrency limit: {0} (must be at least 1)")]
    InvalidConcurrency(usize),
    /// The given string can not be parsed into a valid URL
    #[error("Cannot parse {0} as URL: {1}")]
    ParseUrl(String, #[source] url::ParseError),
    /// The given header could not be parsed.
    /// A possible error when converting a `HeaderValue` from a string or byte
    /// slice.
    #[error("Header could not be parsed")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
    /// The request client cannot be built
    #[error("Failed to build the request client")]
    BuildRequestClient(#[source] reqwest::Error),
    /// Network error while trying to connect to an endpoint
    #[error("Network error while trying to connect to an endpoint")]
    NetworkRequest(#[source] reqwest::Error),
    /// The response carried a client or server error status code
    #[error("Rejected status code: {0}")]
    RejectedStatusCode(StatusCode),
    /// Failed to read or decode a response body.
    /// Returned by response handlers, not by the engine itself.
    #[error("Failed to read response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),
    /// Error from the database driver
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// The connection pool failed to start; replayed to every caller that
    /// awaits readiness after the fact
    #[error("Database startup failed: {0}")]
    DatabaseStartup(String),
    /// The database was used before its startup was initiated
    #[error("Database startup was never initiated: call `Database::start` or `Runner::connect_db`")]
    DatabaseNotStarted,
    /// A callback asked for the database but none was registered
    #[error("No database connected: register one with `Runner::connect_db`")]
    DatabaseNotConnected,
}

impl ErrorKind {
    /// Returns `true` if the error describes a failed execution (as opposed
    /// to a configuration or persistence problem)
    #[must_use]
    pub const fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkRequest(_) | Self::RejectedStatusCode(_)
        )
    }
}

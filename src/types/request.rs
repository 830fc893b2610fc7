use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use reqwest::Response;
use serde_json::Value;
use url::Url;

use crate::ratelimit::RateLimiter;
use crate::runner::RunContext;
use crate::{ErrorKind, Result};

/// The callback pair attached to a [`Request`].
///
/// Exactly one of the two hooks runs per execution, decided by the engine:
///
/// - [`on_response`](Handler::on_response) for responses with a status code
///   below 400. It receives the raw response, a borrow of the originating
///   request (for its token and params), and a [`RunContext`] through which
///   it can reach the registered database.
/// - [`on_failure`](Handler::on_failure) for everything else: rejected
///   status codes ([`ErrorKind::RejectedStatusCode`]), transport errors
///   ([`ErrorKind::NetworkRequest`]), and errors returned by `on_response`
///   itself. Routing callback errors here keeps one broken execution from
///   aborting its siblings; in that one case both hooks have observably run.
///
/// Side effects (persistence writes, in-memory accumulation) are entirely the
/// implementor's responsibility. The engine never reads response bodies.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a response with a status code below 400.
    ///
    /// # Errors
    ///
    /// Any error returned here is routed to [`Handler::on_failure`] and the
    /// execution is counted as failed.
    async fn on_response(&self, request: &Request, response: Response, cx: &RunContext)
    -> Result<()>;

    /// Handle a failed execution.
    async fn on_failure(&self, request: &Request, error: &ErrorKind);
}

/// One outbound call: method, URL, concurrency limit, correlation token, and
/// the callbacks to run on completion.
///
/// A `Request` is immutable once constructed. Cloning shares the rate limiter
/// and the handler, so a request replicated into many queue entries is still
/// capped at its own concurrency limit and accumulates into the same handler
/// state.
#[derive(Clone)]
pub struct Request {
    method: Method,
    url: Url,
    limiter: RateLimiter,
    token: String,
    params: HashMap<String, Value>,
    cooldown: Option<Duration>,
    handler: Arc<dyn Handler>,
}

impl Request {
    /// Create a new request.
    ///
    /// `limit` is the number of executions of *this* request allowed in
    /// flight at once; it does not bound other requests in the batch.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if
    /// - `url` cannot be parsed into a valid URL.
    /// - `limit` is zero.
    pub fn new(
        method: Method,
        url: &str,
        limit: usize,
        token: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| ErrorKind::ParseUrl(url.to_string(), e))?;
        Ok(Request {
            method,
            url,
            limiter: RateLimiter::new(limit)?,
            token: token.into(),
            params: HashMap::new(),
            cooldown: None,
            handler,
        })
    }

    /// Attach an opaque parameter bag.
    ///
    /// The engine passes it through untouched; it exists for handler-side
    /// extensions.
    #[must_use]
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Override the run-level cooldown for this request
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// The HTTP method sent with every execution
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Opaque correlation token.
    ///
    /// Carries no engine semantics; it shows up in log lines and in
    /// [`Display`] output.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The opaque parameter bag
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    /// The per-request cooldown override, if any
    #[must_use]
    pub const fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    /// The concurrency limit this request was created with
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limiter.limit()
    }

    pub(crate) const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("token", &self.token)
            .field("limit", &self.limiter.limit())
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.method, self.url, self.token)
    }
}

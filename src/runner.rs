//! Batch execution engine.
//!
//! A [`Runner`] holds a queue of [`Request`]s and dispatches the whole batch
//! concurrently over one HTTP client scoped to the run. Each request is
//! serialized by its own rate limiter, outcomes are routed to the request's
//! [`Handler`](crate::Handler) and folded into a [`RunSummary`].

use std::mem;
use std::time::Duration;

use futures::future::join_all;
use http::header::{self, HeaderMap, HeaderValue};
use log::{debug, error, warn};
use tokio::task::JoinHandle;
use typed_builder::TypedBuilder;

use crate::database::Database;
use crate::types::{ErrorKind, Request, Result, RunSummary};

/// Default wait after each execution while its limiter slot is still held, 1s.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);
/// Default user agent, `volley-<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("volley/", env!("CARGO_PKG_VERSION"));

/// Builder for [`Runner`].
///
/// See crate-level documentation for usage example.
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default, setter(into)))]
#[builder(builder_method(doc = "
Create a builder for building `RunnerBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `RunnerBuilder`.
"))]
pub struct RunnerBuilder {
    /// User-agent sent with every request
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Sets the default [headers] for every request.
    ///
    /// [headers]: https://docs.rs/http/latest/http/header/struct.HeaderName.html
    custom_headers: HeaderMap,
    /// Response timeout per request.
    ///
    /// When unset, requests wait indefinitely (reqwest's default).
    timeout: Option<Duration>,
    /// Wait after each execution while its limiter slot is still held.
    ///
    /// This smooths out bursts against the remote endpoint. Individual
    /// requests can override it, see [`Request::with_cooldown`].
    #[builder(default = DEFAULT_COOLDOWN)]
    cooldown: Duration,
}

impl Default for RunnerBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunnerBuilder {
    /// Instantiates a [`Runner`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the user-agent is invalid.
    pub fn runner(self) -> Result<Runner> {
        let Self {
            user_agent,
            custom_headers: mut headers,
            timeout,
            cooldown,
        } = self;

        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&user_agent).map_err(ErrorKind::InvalidHeader)?,
        );

        Ok(Runner {
            headers,
            timeout,
            cooldown,
            queue: Vec::new(),
            db: None,
        })
    }
}

/// Executes queued requests as one concurrent batch.
///
/// See [`RunnerBuilder`] which contains sane defaults for all configuration
/// options.
#[derive(Debug)]
pub struct Runner {
    /// Default headers sent with every request
    headers: HeaderMap,
    /// Response timeout per request
    timeout: Option<Duration>,
    /// Run-level cooldown, used when a request carries no override
    cooldown: Duration,
    /// Requests waiting for the next run
    queue: Vec<Request>,
    /// Persistence handle passed to response callbacks
    db: Option<Database>,
}

impl Runner {
    /// Register the database and kick off its pool startup in the background.
    ///
    /// Returns immediately; the connection proceeds concurrently with
    /// whatever the caller does next. A startup failure is recorded on the
    /// handle, logged, and surfaced to anyone who awaits
    /// [`Database::ready`] or executes a statement. Callers who would rather
    /// fail fast call [`Database::start`] themselves before registering the
    /// handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn connect_db(&mut self, db: Database) -> &mut Self {
        if db.claim() {
            let handle = db.clone();
            tokio::spawn(async move {
                if let Err(e) = handle.connect().await {
                    error!("database startup failed: {e}");
                }
            });
        }
        self.db = Some(db);
        self
    }

    /// Add a request to the queue
    pub fn enqueue(&mut self, request: Request) -> &mut Self {
        self.queue.push(request);
        self
    }

    /// Add a whole batch of requests to the queue
    pub fn enqueue_all(&mut self, requests: impl IntoIterator<Item = Request>) -> &mut Self {
        self.queue.extend(requests);
        self
    }

    /// Number of requests waiting for the next run
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Execute every queued request and wait for the whole batch to finish.
    ///
    /// All requests are dispatched concurrently over one HTTP client scoped
    /// to this run; per-request concurrency is bounded by each request's own
    /// limiter. Individual failures are routed to the handlers and counted
    /// in the summary, they never abort the batch.
    ///
    /// The queue is consumed: running again without re-enqueueing returns
    /// [`ErrorKind::EmptyQueue`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the queue is empty or the request client cannot
    /// be created.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let queue = mem::take(&mut self.queue);
        if queue.is_empty() {
            return Err(ErrorKind::EmptyQueue);
        }

        let client = self.http_client()?;
        let cx = RunContext {
            db: self.db.clone(),
        };
        let cooldown = self.cooldown;

        debug!("dispatching {} requests", queue.len());
        let summary = join_all(
            queue
                .iter()
                .map(|request| execute(&client, &cx, request, cooldown)),
        )
        .await
        .into_iter()
        .fold(RunSummary::default(), |mut summary, succeeded| {
            if succeeded {
                summary.record_success();
            } else {
                summary.record_failure();
            }
            summary
        });

        debug!(
            "batch finished: {} of {} succeeded",
            summary.succeeded(),
            summary.total()
        );
        Ok(summary)
    }

    /// Move the runner onto a background task and execute the batch there.
    ///
    /// Fire-and-forget counterpart of [`Runner::run`]: the returned handle
    /// can be awaited for the [`RunSummary`] or simply dropped. An empty
    /// queue is still rejected synchronously, before any task is spawned.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(mut self) -> Result<JoinHandle<Result<RunSummary>>> {
        if self.queue.is_empty() {
            return Err(ErrorKind::EmptyQueue);
        }
        Ok(tokio::spawn(async move { self.run().await }))
    }

    /// One client per run; dropped when the run is over.
    fn http_client(&self) -> Result<reqwest::Client> {
        let builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(self.headers.clone());

        (match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        })
        .build()
        .map_err(ErrorKind::BuildRequestClient)
    }
}

/// Capabilities a response callback may reach during a run.
///
/// Currently that is the optional [`Database`] registered via
/// [`Runner::connect_db`].
#[derive(Debug, Clone)]
pub struct RunContext {
    db: Option<Database>,
}

impl RunContext {
    /// The registered database.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::DatabaseNotConnected`] if no database was
    /// registered with the runner.
    pub fn db(&self) -> Result<&Database> {
        self.db.as_ref().ok_or(ErrorKind::DatabaseNotConnected)
    }

    /// Returns `true` if a database was registered
    #[must_use]
    pub const fn has_db(&self) -> bool {
        self.db.is_some()
    }
}

/// Runs one queue entry start to finish: limiter slot, HTTP call, callback
/// routing, cooldown. Returns whether the execution counts as succeeded.
///
/// Every fault is absorbed here so that one broken execution cannot take
/// down its siblings in the join.
async fn execute(
    client: &reqwest::Client,
    cx: &RunContext,
    request: &Request,
    default_cooldown: Duration,
) -> bool {
    if request.limiter().available_slots() == 0 {
        debug!("waiting for a free slot: {request}");
    }
    let _permit = request.limiter().acquire().await;
    debug!("sending {request}");

    let succeeded = match client
        .request(request.method().clone(), request.url().clone())
        .send()
        .await
    {
        Ok(response) => {
            let status = response.status();
            // nonstandard codes above 599 are rejected too
            if status.as_u16() >= 400 {
                fail(request, &ErrorKind::RejectedStatusCode(status)).await
            } else {
                match request.handler().on_response(request, response, cx).await {
                    Ok(()) => true,
                    Err(e) => fail(request, &e).await,
                }
            }
        }
        Err(e) => fail(request, &ErrorKind::NetworkRequest(e)).await,
    };

    // the slot stays taken during the cooldown
    tokio::time::sleep(request.cooldown().unwrap_or(default_cooldown)).await;
    succeeded
}

/// Routes an execution failure to the request's `on_failure` hook. Always
/// returns `false` for the fan-in fold.
async fn fail(request: &Request, error: &ErrorKind) -> bool {
    if error.is_request_failure() {
        warn!("{request} failed: {error}");
    } else {
        warn!("{request} failed in its response handler: {error}");
    }
    request.handler().on_failure(request, error).await;
    false
}

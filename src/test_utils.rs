//! Helpers shared by the unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;

use crate::runner::RunContext;
use crate::types::{ErrorKind, Handler, Request, Result};

#[macro_export]
/// Creates a mock web server, which responds with a predefined status when
/// handling a matching request
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Counts callback invocations and records failure messages
#[derive(Debug, Default)]
pub(crate) struct CountingHandler {
    responses: AtomicUsize,
    failures: AtomicUsize,
    errors: Mutex<Vec<String>>,
}

impl CountingHandler {
    pub(crate) fn responses(&self) -> usize {
        self.responses.load(Ordering::SeqCst)
    }

    pub(crate) fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn on_response(&self, _: &Request, _: Response, _: &RunContext) -> Result<()> {
        self.responses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_failure(&self, _: &Request, error: &ErrorKind) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Tracks how many `on_response` calls overlap, for asserting that a limiter
/// actually bounds concurrency. Each call holds its slot for `hold` so that
/// overlapping executions are observable.
#[derive(Debug)]
pub(crate) struct GaugeHandler {
    active: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

impl GaugeHandler {
    pub(crate) fn new(hold: Duration) -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            hold,
        }
    }

    /// Largest number of `on_response` calls seen in flight at once
    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for GaugeHandler {
    async fn on_response(&self, _: &Request, _: Response, _: &RunContext) -> Result<()> {
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_failure(&self, _: &Request, _: &ErrorKind) {}
}

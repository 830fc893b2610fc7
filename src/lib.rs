//! `volley` is a library for dispatching batches of HTTP requests.
//!
//! Requests carry their own concurrency limit and a pair of callbacks; the
//! [`Runner`] executes the whole queue concurrently, serializes each request
//! through its limiter, and routes every outcome to the matching callback.
//! "Hello world" example:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use volley::{
//!     ErrorKind, Handler, Method, Request, Response, Result, RunContext, RunnerBuilder,
//!     async_trait,
//! };
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Handler for Printer {
//!     async fn on_response(
//!         &self,
//!         request: &Request,
//!         response: Response,
//!         _: &RunContext,
//!     ) -> Result<()> {
//!         println!("{}: {}", request.token(), response.status());
//!         Ok(())
//!     }
//!
//!     async fn on_failure(&self, request: &Request, error: &ErrorKind) {
//!         eprintln!("{request} failed: {error}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let request = Request::new(Method::GET, "https://example.com", 2, "demo", Arc::new(Printer))?;
//!     let mut runner = RunnerBuilder::default().runner()?;
//!     let summary = runner.enqueue_all(vec![request; 4]).run().await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! Batches that persist their results register a [`Database`] first; its
//! pool is started in the background and handlers reach it through
//! [`RunContext::db`]:
//!
//! ```no_run
//! use volley::{Database, DatabaseConfig, Result, RunnerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let db = Database::new(DatabaseConfig::default());
//!     let mut runner = RunnerBuilder::default().runner()?;
//!     runner.connect_db(db);
//!     Ok(())
//! }
//! ```

#[cfg(doctest)]
doc_comment::doctest!("../README.md");

mod database;
mod ratelimit;
mod runner;
mod types;

#[cfg(test)]
#[macro_use]
pub mod test_utils;

pub use async_trait::async_trait;
pub use database::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_MAX_CONNECTIONS, Database, DatabaseConfig};
pub use ratelimit::RateLimiter;
pub use reqwest::{Method, Response, StatusCode};
pub use runner::{DEFAULT_COOLDOWN, DEFAULT_USER_AGENT, RunContext, Runner, RunnerBuilder};
pub use types::*;

//! Market-data ingestion batch: two endpoints replicated into twenty queue
//! entries, one execution per endpoint in flight at a time.
//!
//! Expects a Postgres server with default credentials on localhost; without
//! one the executions run into the recorded startup failure and the
//! `on_failure` path is demonstrated instead.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use volley::{
    Database, DatabaseConfig, ErrorKind, Handler, Method, Request, Response, Result, RunContext,
    RunnerBuilder, async_trait,
};

/// Accumulates kline payloads and mirrors each one into the database.
#[derive(Default)]
struct Collect {
    data: Mutex<Vec<Value>>,
}

#[async_trait]
impl Handler for Collect {
    async fn on_response(
        &self,
        request: &Request,
        response: Response,
        cx: &RunContext,
    ) -> Result<()> {
        println!("Got response {}", request.token());
        let payload: Value = response.json().await.map_err(ErrorKind::ReadResponseBody)?;
        cx.db()?
            .execute(
                "INSERT INTO klines (token, payload) VALUES ($1, $2)",
                &[request.token().into(), payload.clone()],
            )
            .await?;
        self.data.lock().unwrap().push(payload);
        Ok(())
    }

    async fn on_failure(&self, request: &Request, error: &ErrorKind) {
        eprintln!("{request} failed: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let collect = Arc::new(Collect::default());

    let klines_1h = Request::new(
        Method::GET,
        "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1h",
        1,
        "task1",
        collect.clone(),
    )?;
    let klines_2h = Request::new(
        Method::GET,
        "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=2h",
        1,
        "task2",
        collect.clone(),
    )?;

    let batch: Vec<_> = [klines_1h, klines_2h]
        .into_iter()
        .cycle()
        .take(20)
        .collect();

    let mut runner = RunnerBuilder::builder()
        .timeout(Duration::from_secs(20))
        .build()
        .runner()?;
    let summary = runner
        .connect_db(Database::new(DatabaseConfig::default()))
        .enqueue_all(batch)
        .run()
        .await?;

    println!("{summary}");
    println!("collected {} payloads", collect.data.lock().unwrap().len());
    Ok(())
}

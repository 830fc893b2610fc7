//! Lazily started Postgres pool for result persistence.
//!
//! The engine never touches the database itself; it only guarantees that pool
//! startup was *initiated* before request execution begins. Callbacks that
//! depend on the pool either await [`Database::ready`] or simply call
//! [`Database::execute`], which awaits readiness internally and replays a
//! startup failure as an error.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use sqlx::Postgres;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::query::Query;
use tokio::sync::watch;

use crate::{ErrorKind, Result};

/// Default maximum number of pooled connections, 10.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// Default wait for a pool connection before startup counts as failed, 30s.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters for the result store.
///
/// Deserializable so collaborators can load it from their own config files.
/// The password is held as a [`SecretString`] and never shows up in `Debug`
/// output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Host name of the database server
    pub host: String,
    /// User to authenticate as
    pub user: String,
    /// Password for `user`
    pub password: SecretString,
    /// Port the server listens on
    pub port: u16,
    /// Database name
    pub database: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// How long to wait for a connection before giving up.
    ///
    /// The pool retries failed connection attempts until this elapses, so it
    /// also bounds how long a doomed startup takes to report failure.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from(String::new()),
            port: 5432,
            database: "postgres".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

/// Observable startup state, broadcast over a watch channel.
///
/// Transitions are one-way: `Idle → Connecting → Ready | Failed`. `Failed`
/// is terminal and replayed to every later caller.
#[derive(Debug, Clone)]
enum PoolState {
    Idle,
    Connecting,
    Ready(PgPool),
    // sqlx errors are not Clone, keep the message for replay
    Failed(String),
}

#[derive(Debug)]
struct DatabaseInner {
    config: DatabaseConfig,
    state: watch::Sender<PoolState>,
}

/// Handle to the asynchronously started connection pool.
///
/// Cheap to clone; all clones observe the same pool and the same startup
/// outcome. The pool is shared across the runner's whole lifetime (it is not
/// scoped to a single run) and may be used concurrently by multiple callback
/// invocations; isolation is whatever the individual pooled connections
/// provide.
#[derive(Debug, Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Wrap the given connection parameters. Performs no I/O; the pool is
    /// started later via [`Database::start`] or
    /// [`Runner::connect_db`](crate::Runner::connect_db).
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        let (state, _) = watch::channel(PoolState::Idle);
        Self {
            inner: Arc::new(DatabaseInner { config, state }),
        }
    }

    /// Start the pool and wait until it is ready.
    ///
    /// Safe to call any number of times: the first caller performs the
    /// connection, every later caller awaits and observes the first outcome.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the pool cannot be established.
    pub async fn start(&self) -> Result<()> {
        if self.claim() {
            self.connect().await
        } else {
            self.ready().await
        }
    }

    /// Wait until startup has finished, surfacing its outcome.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if startup failed ([`ErrorKind::DatabaseStartup`]) or
    /// was never initiated ([`ErrorKind::DatabaseNotStarted`]).
    pub async fn ready(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    /// Execute a single statement with positional parameters.
    ///
    /// Parameters are bound by their JSON type: null, bool, i64/f64, and text
    /// map to the corresponding Postgres types; arrays and objects go over
    /// the wire as JSONB. Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the pool is not ready (see [`Database::ready`]) or
    /// the statement fails.
    pub async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64> {
        let pool = self.pool().await?;
        let mut query = sqlx::query(statement);
        for value in params {
            query = bind_value(query, value);
        }
        Ok(query.execute(&pool).await?.rows_affected())
    }

    /// Execute one statement once per parameter row, inside a single
    /// transaction. Returns the total number of rows affected.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the pool is not ready or any row fails; the
    /// transaction is rolled back in that case.
    pub async fn execute_batch(&self, statement: &str, rows: &[Vec<Value>]) -> Result<u64> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;
        let mut affected = 0;
        for row in rows {
            let mut query = sqlx::query(statement);
            for value in row {
                query = bind_value(query, value);
            }
            affected += query.execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    /// Claim the `Idle → Connecting` transition. Returns `true` for the one
    /// caller that must now run [`Database::connect`].
    pub(crate) fn claim(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if matches!(state, PoolState::Idle) {
                *state = PoolState::Connecting;
                true
            } else {
                false
            }
        })
    }

    /// Establish the pool and publish the outcome. Only the caller that won
    /// [`Database::claim`] may call this.
    pub(crate) async fn connect(&self) -> Result<()> {
        let config = &self.inner.config;
        debug!(
            "starting database pool for {}:{}/{}",
            config.host, config.port, config.database
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose_secret())
            .database(&config.database);

        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
        {
            Ok(pool) => {
                debug!("database pool ready");
                self.inner.state.send_replace(PoolState::Ready(pool));
                Ok(())
            }
            Err(e) => {
                self.inner
                    .state
                    .send_replace(PoolState::Failed(e.to_string()));
                Err(ErrorKind::Database(e))
            }
        }
    }

    /// Await a terminal state and hand out the pool.
    async fn pool(&self) -> Result<PgPool> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, PoolState::Connecting))
            .await
            // SAFETY: this should not panic as the sender lives inside `self`
            .expect("Database state channel closed unexpectedly")
            .clone();

        match state {
            PoolState::Ready(pool) => Ok(pool),
            PoolState::Failed(message) => Err(ErrorKind::DatabaseStartup(message)),
            PoolState::Idle | PoolState::Connecting => Err(ErrorKind::DatabaseNotStarted),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                query.bind(int)
            } else if let Some(float) = n.as_f64() {
                query.bind(float)
            } else {
                query.bind(n.to_string())
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        // arrays and objects go over the wire as JSONB
        Value::Array(_) | Value::Object(_) => query.bind(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Nothing listens on port 1 on loopback, so startup fails without a
    /// database server; the short acquire timeout bounds how long the pool
    /// keeps retrying the refused connection.
    fn unreachable_config() -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            acquire_timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = DatabaseConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "postgres");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.acquire_timeout, DEFAULT_ACQUIRE_TIMEOUT);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = DatabaseConfig {
            password: SecretString::from("hunter2".to_string()),
            ..Default::default()
        };
        let out = format!("{config:?}");
        assert!(!out.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_ready_before_start_is_an_error() {
        let db = Database::new(DatabaseConfig::default());
        assert!(matches!(
            db.ready().await,
            Err(ErrorKind::DatabaseNotStarted)
        ));
    }

    #[tokio::test]
    async fn test_failed_startup_is_replayed() {
        let db = Database::new(unreachable_config());

        assert!(matches!(db.start().await, Err(ErrorKind::Database(_))));
        // later callers get the recorded failure, not a fresh attempt
        assert!(matches!(
            db.ready().await,
            Err(ErrorKind::DatabaseStartup(_))
        ));
        assert!(matches!(
            db.execute("SELECT 1", &[]).await,
            Err(ErrorKind::DatabaseStartup(_))
        ));
    }

    #[tokio::test]
    async fn test_second_start_observes_first_outcome() {
        let db = Database::new(unreachable_config());

        let first = db.start().await;
        let second = db.start().await;

        assert!(matches!(first, Err(ErrorKind::Database(_))));
        assert!(matches!(second, Err(ErrorKind::DatabaseStartup(_))));
    }

    #[tokio::test]
    async fn test_clones_observe_the_same_state() {
        let db = Database::new(unreachable_config());
        let clone = db.clone();

        assert!(db.start().await.is_err());
        assert!(matches!(
            clone.ready().await,
            Err(ErrorKind::DatabaseStartup(_))
        ));
    }
}

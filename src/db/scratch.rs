//! Scratch databases for tests
//!
//! A [`TestDatabase`] owns a uniquely named database on the server and the
//! pool connected to it. The database lives for one test: it is created and
//! migrated up front, then dropped by [`TestDatabase::teardown`] (or, as a
//! last resort, when the value is dropped).

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool};
use sqlx::{ConnectOptions, Connection};
use tracing::{error, info, warn};

use super::{connect_options, migrate, IsolationMode, SocketResolver, SET_UTC};
use crate::error::{Error, Result};
use crate::Config;

/// Prefix of every scratch database name
pub const SCRATCH_PREFIX: &str = "test_";

/// Bounds how long a cleanup `DROP DATABASE` waits on another session's
/// metadata locks
const CLEANUP_LOCK_WAIT: &str = "SET SESSION lock_wait_timeout=5;";

/// Generate a scratch database name from the current time in nanoseconds.
///
/// Names are not checked for collisions; two calls within the clock's
/// resolution can return the same name.
pub fn scratch_database_name() -> String {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1_000);
    format!("{}{}", SCRATCH_PREFIX, nanos)
}

/// A migrated scratch database, dropped on teardown
pub struct TestDatabase {
    pool: MySqlPool,
    name: String,
    server: MySqlConnectOptions,
    torn_down: bool,
}

impl TestDatabase {
    /// Create a scratch database using the configured test URI
    pub async fn create<S: AsRef<str>>(config: &Config, migrations: &[S]) -> Result<Self> {
        let uri = config.resolve_test_uri(&SocketResolver::default());
        Self::create_with(&uri, config.isolation, migrations).await
    }

    /// Create a scratch database on the server at `uri`
    pub async fn create_with<S: AsRef<str>>(
        uri: &str,
        isolation: IsolationMode,
        migrations: &[S],
    ) -> Result<Self> {
        let server = connect_options(uri)?;
        let bootstrap = isolation
            .pool_options()
            .connect_with(server.clone())
            .await
            .map_err(Error::Connection)?;

        let name = scratch_database_name();
        let pool = match Self::provision(&bootstrap, &server, isolation, &name).await {
            Ok(pool) => pool,
            Err(err) => {
                bootstrap.close().await;
                return Err(err);
            }
        };

        let mut db = Self {
            pool,
            name,
            server,
            torn_down: false,
        };

        if let Err(err) = migrate(&db.pool, migrations).await {
            let cleanup = db.drop_and_close().await;
            return settle(Err(err), cleanup);
        }

        Ok(db)
    }

    /// Create the database and return a pool whose sessions use it
    async fn provision(
        bootstrap: &MySqlPool,
        server: &MySqlConnectOptions,
        isolation: IsolationMode,
        name: &str,
    ) -> Result<MySqlPool> {
        sqlx::raw_sql(SET_UTC)
            .execute(bootstrap)
            .await
            .map_err(|e| Error::lifecycle("set time zone", name, e))?;

        info!("Creating scratch database {}", name);
        sqlx::raw_sql(&format!("CREATE DATABASE {};", name))
            .execute(bootstrap)
            .await
            .map_err(|e| Error::lifecycle("create", name, e))?;

        let selected = match isolation {
            IsolationMode::SingleSession => sqlx::raw_sql(&format!("USE {};", name))
                .execute(bootstrap)
                .await
                .map(|_| bootstrap.clone()),
            IsolationMode::Pooled { .. } => {
                let pool = isolation
                    .pool_options()
                    .connect_with(server.clone().database(name))
                    .await;
                bootstrap.close().await;
                pool
            }
        };

        match selected {
            Ok(pool) => Ok(pool),
            Err(err) => {
                Self::drop_database(server, name).await;
                Err(Error::lifecycle("select", name, err))
            }
        }
    }

    /// Best-effort drop from a fresh connection, used on provisioning failure
    async fn drop_database(server: &MySqlConnectOptions, name: &str) {
        if let Err(err) = drop_from_new_session(server, name).await {
            error!("Failed to drop scratch database {}: {}", name, err);
        }
    }

    /// Run `body` against a fresh scratch database, always tearing it down.
    ///
    /// If both `body` and teardown fail, the error is [`Error::Cleanup`]
    /// carrying both. A panic in `body` is re-raised after teardown; a
    /// teardown failure in that case is only logged.
    pub async fn run<S, F, Fut, T>(config: &Config, migrations: &[S], body: F) -> Result<T>
    where
        S: AsRef<str>,
        F: FnOnce(MySqlPool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let db = Self::create(config, migrations).await?;
        let outcome = AssertUnwindSafe(body(db.pool.clone())).catch_unwind().await;
        let teardown = db.teardown().await;

        match outcome {
            Ok(result) => settle(result, teardown),
            Err(panic) => {
                if let Err(cleanup) = teardown {
                    error!("{}", cleanup);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Handle to the scratch database
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// Name of the scratch database
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the database and close the handle
    pub async fn teardown(mut self) -> Result<()> {
        self.drop_and_close().await
    }

    async fn drop_and_close(&mut self) -> Result<()> {
        self.torn_down = true;

        info!("Dropping scratch database {}", self.name);
        let dropped = sqlx::raw_sql(&format!("DROP DATABASE {};", self.name))
            .execute(&self.pool)
            .await;
        self.pool.close().await;

        dropped
            .map(|_| ())
            .map_err(|e| Error::lifecycle("drop", self.name.as_str(), e))
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }

        warn!("{} dropped without teardown, dropping database", self.name);

        // The pool is bound to the caller's runtime, which may be blocked on
        // this thread; reconnect from a private runtime instead.
        let server = self.server.clone();
        let name = self.name.clone();
        let result = std::thread::spawn(move || -> std::result::Result<(), String> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| e.to_string())?;
            runtime
                .block_on(drop_from_new_session(&server, &name))
                .map_err(|e| e.to_string())
        })
        .join()
        .unwrap_or_else(|_| Err("cleanup thread panicked".to_string()));

        if let Err(err) = result {
            if std::thread::panicking() {
                error!("Failed to drop scratch database {}: {}", self.name, err);
            } else {
                panic!("failed to drop scratch database {}: {}", self.name, err);
            }
        }
    }
}

/// Drop `name` from a new connection, independent of any pool
async fn drop_from_new_session(
    server: &MySqlConnectOptions,
    name: &str,
) -> std::result::Result<(), sqlx::Error> {
    let mut conn = server.connect().await?;
    sqlx::raw_sql(CLEANUP_LOCK_WAIT).execute(&mut conn).await?;
    sqlx::raw_sql(&format!("DROP DATABASE {};", name))
        .execute(&mut conn)
        .await?;
    conn.close().await
}

/// Combine an outcome with its teardown result; teardown failure is fatal
fn settle<T>(outcome: Result<T>, teardown: Result<()>) -> Result<T> {
    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(cleanup),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => Err(Error::Cleanup {
            error: Box::new(err),
            cleanup: Box::new(cleanup),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_failed() -> Error {
        Error::lifecycle("drop", "test_1", sqlx::Error::PoolClosed)
    }

    #[test]
    fn test_settle_success() {
        assert_eq!(settle(Ok(7), Ok(())).unwrap(), 7);
    }

    #[test]
    fn test_settle_teardown_failure_is_fatal() {
        let err = settle(Ok(7), Err(drop_failed())).unwrap_err();
        assert!(matches!(err, Error::Lifecycle { operation: "drop", .. }));
    }

    #[test]
    fn test_settle_keeps_body_error() {
        let err = settle::<()>(Err(Error::InvalidUri("body".to_string())), Ok(())).unwrap_err();
        assert!(matches!(err, Error::InvalidUri(_)));
    }

    #[test]
    fn test_settle_reports_both_failures() {
        let err =
            settle::<()>(Err(Error::InvalidUri("body".to_string())), Err(drop_failed())).unwrap_err();
        match err {
            Error::Cleanup { error, cleanup } => {
                assert!(matches!(*error, Error::InvalidUri(_)));
                assert!(matches!(*cleanup, Error::Lifecycle { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = settle::<()>(Err(Error::InvalidUri("body".to_string())), Err(drop_failed()))
            .unwrap_err()
            .to_string();
        assert!(message.contains("body"), "{message}");
        assert!(message.contains("cleanup also failed"), "{message}");
    }

    #[test]
    fn test_scratch_name_format() {
        let name = scratch_database_name();
        let digits = name.strip_prefix(SCRATCH_PREFIX).unwrap();
        assert!(!digits.is_empty());
        assert!(digits.chars().all(|c| c.is_ascii_digit()), "{name}");
    }

    #[test]
    fn test_scratch_names_distinct_over_time() {
        let first = scratch_database_name();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = scratch_database_name();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_uri() {
        let result =
            TestDatabase::create_with("root@localhost/", IsolationMode::SingleSession, &[""]).await;
        assert!(matches!(result, Err(Error::InvalidUri(_))));
    }
}

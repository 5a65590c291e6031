//! Database module - MySQL connections, migrations and scratch databases

pub mod endpoint;
pub mod migrate;
pub mod scratch;
pub mod uri;

pub use endpoint::{EndpointResolver, FixedEndpoint, SocketResolver};
pub use migrate::{migrate, read_migrations};
pub use scratch::{scratch_database_name, TestDatabase};
pub use uri::ConnectUri;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Executor;
use tracing::debug;

use crate::error::{Error, Result};

/// Statement forcing the session time zone to UTC
pub const SET_UTC: &str = "set time_zone='+00:00';";

/// How connections to a scratch database are isolated from each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum IsolationMode {
    /// Exactly one reusable connection; the database is selected with `USE`
    SingleSession,
    /// Up to `max_connections`; every connection selects the database itself
    Pooled { max_connections: u32 },
}

impl Default for IsolationMode {
    fn default() -> Self {
        IsolationMode::SingleSession
    }
}

impl IsolationMode {
    /// Pool options for this mode
    pub fn pool_options(&self) -> MySqlPoolOptions {
        match *self {
            // Never recycle the connection: a new one would lose `USE`
            IsolationMode::SingleSession => MySqlPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None),
            IsolationMode::Pooled { max_connections } => MySqlPoolOptions::new()
                .max_connections(max_connections.max(1))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute(SET_UTC).await?;
                        Ok(())
                    })
                }),
        }
    }
}

/// Parse a URI into driver options, applying the default options
pub fn connect_options(uri: &str) -> Result<MySqlConnectOptions> {
    let uri = ConnectUri::parse(uri)?.with_default_options();
    MySqlConnectOptions::from_str(&uri.as_url()).map_err(|e| Error::InvalidUri(e.to_string()))
}

/// Open a handle for `uri` with default pool settings
///
/// The handshake is deferred until the handle is first used.
pub fn connect(uri: &str) -> Result<MySqlPool> {
    let options = connect_options(uri)?;
    debug!("Opening connection pool");
    Ok(MySqlPoolOptions::new().connect_lazy_with(options))
}

/// Open a handle for `uri` and establish the first connection immediately
pub async fn connect_with(uri: &str, isolation: IsolationMode) -> Result<MySqlPool> {
    let options = connect_options(uri)?;
    isolation
        .pool_options()
        .connect_with(options)
        .await
        .map_err(Error::Connection)
}

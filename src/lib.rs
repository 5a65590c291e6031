//! truss - MySQL helpers for applications and their tests
//!
//! Connection URIs, migrations, scratch databases per test and schema
//! snapshot checks.

pub mod db;
pub mod error;
pub mod schema;

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub use db::{connect, migrate, IsolationMode, TestDatabase};
pub use error::{Error, Result};
pub use schema::{create_schema, test_schema, SnapshotMode};

use db::EndpointResolver;

/// Default configuration file, read from the working directory
pub const CONFIG_FILE: &str = "truss.toml";

/// Prefix of configuration environment variables (`TRUSS_TEST_URI`, ...)
pub const ENV_PREFIX: &str = "TRUSS_";

/// Test database configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Server used for scratch databases; `None` = local socket
    pub test_uri: Option<String>,
    /// Session isolation of scratch database handles
    #[serde(default)]
    pub isolation: IsolationMode,
}

impl Config {
    /// Defaults, then `truss.toml`, then `TRUSS_*` environment variables
    pub fn figment() -> Figment {
        Self::figment_from(CONFIG_FILE)
    }

    /// Like [`Config::figment`] with an explicit configuration file
    pub fn figment_from(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        Ok(Self::figment().extract()?)
    }

    /// The configured test URI, or the resolver's default
    pub fn resolve_test_uri(&self, resolver: &dyn EndpointResolver) -> String {
        match &self.test_uri {
            Some(uri) => uri.clone(),
            None => resolver.default_uri(),
        }
    }
}

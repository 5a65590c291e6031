//! Default endpoint discovery for test connections

use std::path::{Path, PathBuf};

use tracing::debug;

/// Conventional macOS/Homebrew socket location, probed first
pub const PRIMARY_SOCKET: &str = "/tmp/mysql.sock";

/// Common Linux/Ubuntu socket location
pub const FALLBACK_SOCKET: &str = "/var/run/mysqld/mysqld.sock";

/// Supplies the connection URI used when none is configured
pub trait EndpointResolver: Send + Sync {
    fn default_uri(&self) -> String;
}

/// Resolves a local Unix socket by probing well-known paths.
///
/// Only checks that a file exists; the server may still be unreachable.
#[derive(Debug, Clone)]
pub struct SocketResolver {
    primary: PathBuf,
    fallback: PathBuf,
}

impl Default for SocketResolver {
    fn default() -> Self {
        Self::new(PRIMARY_SOCKET, FALLBACK_SOCKET)
    }
}

impl SocketResolver {
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// The primary path if it exists, otherwise the fallback
    pub fn socket_path(&self) -> &Path {
        if self.primary.exists() {
            &self.primary
        } else {
            debug!(
                "{} not found, using {}",
                self.primary.display(),
                self.fallback.display()
            );
            &self.fallback
        }
    }
}

impl EndpointResolver for SocketResolver {
    fn default_uri(&self) -> String {
        format!(
            "mysql://root@localhost/?socket={}",
            self.socket_path().display()
        )
    }
}

/// Always resolves to the same URI
#[derive(Debug, Clone)]
pub struct FixedEndpoint(pub String);

impl EndpointResolver for FixedEndpoint {
    fn default_uri(&self) -> String {
        self.0.clone()
    }
}

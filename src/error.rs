//! Error type shared by every truss operation

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by truss
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid connection URI: {0}")]
    InvalidUri(String),

    #[error("connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("migration {index} failed ({statement}): {source}")]
    Migration {
        index: usize,
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} of database {database} failed: {source}")]
    Lifecycle {
        operation: &'static str,
        database: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("{error}; cleanup also failed: {cleanup}")]
    Cleanup {
        #[source]
        error: Box<Error>,
        cleanup: Box<Error>,
    },

    #[error("schema snapshot {} is out of date: {diff}", .path.display())]
    SnapshotMismatch { path: PathBuf, diff: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn lifecycle(
        operation: &'static str,
        database: impl Into<String>,
        source: sqlx::Error,
    ) -> Self {
        Error::Lifecycle {
            operation,
            database: database.into(),
            source,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

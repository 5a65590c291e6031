//! Ordered, fail-fast migration runner

use std::path::Path;

use sqlx::mysql::MySqlPool;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Apply `statements` in order, stopping at the first failure.
///
/// Statements that already ran stay applied. The error carries the
/// zero-based index and text of the failing statement.
pub async fn migrate<S: AsRef<str>>(pool: &MySqlPool, statements: &[S]) -> Result<()> {
    if statements.is_empty() {
        return Ok(());
    }

    info!("Running {} migration statements...", statements.len());

    for (index, statement) in statements.iter().enumerate() {
        let statement = statement.as_ref();
        debug!(index, "{}", statement);

        sqlx::raw_sql(statement)
            .execute(pool)
            .await
            .map_err(|source| Error::Migration {
                index,
                statement: statement.to_string(),
                source,
            })?;
    }

    info!("Migrations complete");
    Ok(())
}

/// Read migration files in the given order, one entry per file
pub fn read_migrations<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<String>> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            std::fs::read_to_string(path).map_err(|e| Error::io(path, e))
        })
        .collect()
}

//! Schema snapshots - `CREATE` statements checked against a reference file

use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::info;

use crate::db::TestDatabase;
use crate::error::{Error, Result};
use crate::Config;

/// Counter value that changes with every insert
static AUTO_INCREMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" AUTO_INCREMENT=\d+").expect("valid regex"));

/// View owner, which depends on the account that ran the migration
static DEFINER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" DEFINER=`[^`]*`@`[^`]*`").expect("valid regex"));

/// What to do with a freshly generated snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Overwrite the reference file
    Update,
    /// Require the reference file to match exactly
    Verify,
}

impl SnapshotMode {
    pub fn from_update_flag(update: bool) -> Self {
        if update {
            SnapshotMode::Update
        } else {
            SnapshotMode::Verify
        }
    }
}

/// Generate the `CREATE` statements for every table and view, sorted by name
pub async fn create_schema(pool: &MySqlPool) -> Result<String> {
    let rows = sqlx::raw_sql("SHOW FULL TABLES;")
        .fetch_all(pool)
        .await
        .map_err(Error::Connection)?;

    let mut objects = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.try_get_unchecked(0).map_err(Error::Connection)?;
        let kind: String = row.try_get_unchecked(1).map_err(Error::Connection)?;
        objects.push((name, kind == "VIEW"));
    }
    objects.sort();

    let mut schema = String::new();
    for (name, is_view) in &objects {
        let show = if *is_view {
            format!("SHOW CREATE VIEW {};", quote_identifier(name))
        } else {
            format!("SHOW CREATE TABLE {};", quote_identifier(name))
        };
        let row = sqlx::raw_sql(&show)
            .fetch_one(pool)
            .await
            .map_err(Error::Connection)?;
        let create: String = row.try_get_unchecked(1).map_err(Error::Connection)?;

        schema.push_str(&normalize(&create));
        schema.push_str(";\n\n");
    }

    Ok(schema)
}

/// Backtick-quote an identifier, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Strip parts of a `CREATE` statement that vary between runs
pub fn normalize(create: &str) -> String {
    let create = AUTO_INCREMENT.replace_all(create, "");
    DEFINER.replace_all(&create, "").into_owned()
}

/// Write or verify `snapshot` against the file at `path`
pub fn compare_snapshot(path: &Path, snapshot: &str, mode: SnapshotMode) -> Result<()> {
    match mode {
        SnapshotMode::Update => {
            write_snapshot(path, snapshot)?;
            info!("Updated schema snapshot {}", path.display());
            Ok(())
        }
        SnapshotMode::Verify => {
            let expected = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
            match first_difference(&expected, snapshot) {
                None => Ok(()),
                Some(diff) => Err(Error::SnapshotMismatch {
                    path: path.to_path_buf(),
                    diff,
                }),
            }
        }
    }
}

/// Snapshot a migrated database and compare it with the file at `path`
pub async fn check_schema(pool: &MySqlPool, path: &Path, mode: SnapshotMode) -> Result<()> {
    let snapshot = create_schema(pool).await?;
    compare_snapshot(path, &snapshot, mode)
}

/// Migrate a scratch database and check its schema against `path`
pub async fn test_schema<S: AsRef<str>>(
    config: &Config,
    path: &Path,
    update: bool,
    migrations: &[S],
) -> Result<()> {
    let mode = SnapshotMode::from_update_flag(update);
    TestDatabase::run(config, migrations, |pool| async move {
        check_schema(&pool, path, mode).await
    })
    .await
}

#[cfg(unix)]
fn write_snapshot(path: &Path, snapshot: &str) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .map_err(|e| Error::io(path, e))?;
    file.write_all(snapshot.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    // mode() only applies on creation and is masked by the umask
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::io(path, e))
}

#[cfg(not(unix))]
fn write_snapshot(path: &Path, snapshot: &str) -> Result<()> {
    let mut file = std::fs::File::create(path).map_err(|e| Error::io(path, e))?;
    file.write_all(snapshot.as_bytes())
        .map_err(|e| Error::io(path, e))
}

/// Describe the first line where `expected` and `actual` differ
fn first_difference(expected: &str, actual: &str) -> Option<String> {
    if expected == actual {
        return None;
    }

    let mut expected_lines = expected.split('\n');
    let mut actual_lines = actual.split('\n');
    let mut line = 1;
    loop {
        match (expected_lines.next(), actual_lines.next()) {
            (Some(e), Some(a)) if e == a => line += 1,
            (e, a) => {
                return Some(format!(
                    "line {}: expected {:?}, got {:?}",
                    line,
                    e.unwrap_or("<end of file>"),
                    a.unwrap_or("<end of file>")
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SNAPSHOT: &str = "CREATE TABLE `t` (\n  `id` int NOT NULL,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB;\n\n";

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users"), "`users`");
        assert_eq!(quote_identifier("odd`name"), "`odd``name`");
        assert_eq!(quote_identifier("``"), "``````");
    }

    #[test]
    fn test_normalize_strips_auto_increment() {
        let create = "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT\n) ENGINE=InnoDB AUTO_INCREMENT=42 DEFAULT CHARSET=utf8mb4";
        assert_eq!(
            normalize(create),
            "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
        );
    }

    #[test]
    fn test_normalize_strips_definer() {
        let create = "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`localhost` SQL SECURITY DEFINER VIEW `v` AS select 1 AS `1`";
        assert_eq!(
            normalize(create),
            "CREATE ALGORITHM=UNDEFINED SQL SECURITY DEFINER VIEW `v` AS select 1 AS `1`"
        );
    }

    #[test]
    fn test_update_then_verify() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.sql");

        compare_snapshot(&path, SNAPSHOT, SnapshotMode::Update).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SNAPSHOT);
        compare_snapshot(&path, SNAPSHOT, SnapshotMode::Verify).unwrap();
    }

    #[test]
    fn test_update_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, "stale contents that are longer than the snapshot\n".repeat(10))
            .unwrap();

        compare_snapshot(&path, SNAPSHOT, SnapshotMode::Update).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SNAPSHOT);
    }

    #[cfg(unix)]
    #[test]
    fn test_update_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.sql");
        compare_snapshot(&path, SNAPSHOT, SnapshotMode::Update).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_verify_mismatch_names_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let changed = SNAPSHOT.replace("`id` int NOT NULL", "`id` bigint NOT NULL");
        let err = compare_snapshot(&path, &changed, SnapshotMode::Verify).unwrap_err();
        match err {
            Error::SnapshotMismatch { path: p, diff } => {
                assert_eq!(p, path);
                assert!(diff.starts_with("line 2:"), "{diff}");
                assert!(diff.contains("bigint"), "{diff}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_verify_detects_trailing_difference() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, SNAPSHOT).unwrap();

        let longer = format!("{}CREATE TABLE `u` (\n  `id` int\n);\n\n", SNAPSHOT);
        let err = compare_snapshot(&path, &longer, SnapshotMode::Verify).unwrap_err();
        assert!(matches!(err, Error::SnapshotMismatch { .. }));
    }

    #[test]
    fn test_verify_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.sql");

        let err = compare_snapshot(&path, SNAPSHOT, SnapshotMode::Verify).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_first_difference() {
        assert_eq!(first_difference("a\nb", "a\nb"), None);
        assert_eq!(
            first_difference("a\nb", "a\nc").unwrap(),
            "line 2: expected \"b\", got \"c\""
        );
        assert_eq!(
            first_difference("a", "a\nb").unwrap(),
            "line 2: expected \"<end of file>\", got \"b\""
        );
    }

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(SnapshotMode::from_update_flag(true), SnapshotMode::Update);
        assert_eq!(SnapshotMode::from_update_flag(false), SnapshotMode::Verify);
    }
}

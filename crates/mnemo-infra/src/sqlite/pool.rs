//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. `DatabasePool` pairs a
//! multi-connection reader pool with a single-connection writer pool, so
//! readers never queue behind the writer. Both use WAL journal mode and
//! enforce foreign keys.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized INSERT/UPDATE.
#[derive(Clone, Debug)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and run the embedded migrations on the writer.
    ///
    /// `acquire_timeout` bounds how long a caller waits for a connection,
    /// so an unreachable database surfaces quickly instead of hanging.
    pub async fn new(database_url: &str, acquire_timeout: Duration) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_with(write_opts)
            .await?;

        // Migrate before the reader pool opens so readers see the schema.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(acquire_timeout)
            .connect_with(read_opts)
            .await?;

        Ok(Self { reader, writer })
    }
}

/// Default database URL inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("mnemo.db").display())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> DatabasePool {
        DatabasePool::new(&database_url(dir.path()), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(table_names, vec!["record_tags", "record_versions", "records"]);
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_version_log_is_append_only() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open(&dir).await;

        sqlx::query(
            "INSERT INTO records (id, category, content, search_text, created_at)
             VALUES ('r1', 'insight', '{}', '', '2026-10-19T00:00:00.000000000Z')",
        )
        .execute(&pool.writer)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO record_versions (record_id, version, op, tags, timestamp)
             VALUES ('r1', 1, 'create', '[]', '2026-10-19T00:00:00.000000000Z')",
        )
        .execute(&pool.writer)
        .await
        .unwrap();

        let update = sqlx::query("UPDATE record_versions SET tags = '[\"x\"]' WHERE record_id = 'r1'")
            .execute(&pool.writer)
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM record_versions WHERE record_id = 'r1'")
            .execute(&pool.writer)
            .await;
        assert!(delete.is_err());
    }

    #[test]
    fn test_database_url() {
        let url = database_url(Path::new("/tmp/mnemo"));
        assert_eq!(url, "sqlite:///tmp/mnemo/mnemo.db?mode=rwc");
    }
}

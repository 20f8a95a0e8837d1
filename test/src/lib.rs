//! ABOUTME: Shared testing utilities and helper functions
//! ABOUTME: Common test fixtures and mocks for all crates

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Simple test helper function to demonstrate cross-crate testing
pub fn create_test_id() -> String {
    "test-id-123".to_string()
}

/// Helper for creating temporary directories in tests
pub fn temp_dir_path() -> std::path::PathBuf {
    std::env::temp_dir().join("jobslib-test")
}

/// An in-memory SQLite pool paired with the `TempDir` that must outlive it
/// when callers need an on-disk file instead (e.g. to exercise reconnect
/// logic). Most tests just want `pool`.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

impl TestDb {
    /// A fresh SQLite pool backed by a throwaway temp-dir file, with the
    /// `locks` and `liveness` tables already created so callers can go
    /// straight to `SqliteLock::from_pool` / `SqliteLiveness::from_pool`.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("test.db");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
            .await
            .expect("connect test sqlite db");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                locked_at INTEGER NOT NULL,
                lease_expires_at INTEGER NOT NULL,
                lock_delay_until INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("create locks table");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS liveness (
                key TEXT PRIMARY KEY,
                fqdn TEXT NOT NULL,
                unix_ts INTEGER NOT NULL,
                time_utc TEXT NOT NULL,
                time_local TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .expect("create liveness table");

        Self { pool, _dir: dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_id() {
        assert_eq!(create_test_id(), "test-id-123");
    }

    #[tokio::test]
    async fn test_test_db_connects() {
        let db = TestDb::new().await;
        sqlx::query("SELECT 1").execute(&db.pool).await.unwrap();
    }
}

//! ABOUTME: Lock provider trait plus SQLite-backed and null implementations
//! ABOUTME: Generalizes a session/lease table with a server-enforced lock_delay window

use async_trait::async_trait;
use jobslib_config::LockOptions;
use jobslib_core::Id;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error("lock transport error: {0}")]
    Transport(String),
    #[error("lock protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Identifies the process holding (or that held) a lease, `fqdn:pid` as the
/// original Consul-backed implementation's instance identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn current() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self(format!("{host}:{}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque token returned by a successful `acquire`. Ownership of the
/// lease is equivalent to ownership of the lock.
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub session_id: String,
    pub ttl: Duration,
    pub lock_delay: Duration,
}

/// Best-effort record of who currently (or most recently) holds a key.
#[derive(Debug, Clone)]
pub struct OwnerInfo {
    pub instance_id: String,
    pub session_id: String,
    pub locked_at: i64,
    pub lease_expires_at: i64,
}

#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn acquire(&self, opts: &LockOptions) -> Result<Option<Lease>>;
    async fn release(&self, lease: &Lease) -> Result<bool>;
    async fn refresh(&self, lease: &Lease) -> Result<bool>;
    async fn owner_info(&self, opts: &LockOptions) -> Result<Option<OwnerInfo>>;
}

/// Always grants the lock trivially. Used with `--disable-one-instance`.
pub struct NullLock {
    instance_id: InstanceId,
}

impl NullLock {
    pub fn new() -> Self {
        Self {
            instance_id: InstanceId::current(),
        }
    }
}

impl Default for NullLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockProvider for NullLock {
    async fn acquire(&self, opts: &LockOptions) -> Result<Option<Lease>> {
        Ok(Some(Lease {
            key: opts.key.clone(),
            session_id: Id::new().to_string(),
            ttl: Duration::from_secs(opts.ttl),
            lock_delay: Duration::from_secs(opts.lock_delay),
        }))
    }

    async fn release(&self, _lease: &Lease) -> Result<bool> {
        Ok(true)
    }

    async fn refresh(&self, _lease: &Lease) -> Result<bool> {
        Ok(true)
    }

    async fn owner_info(&self, _opts: &LockOptions) -> Result<Option<OwnerInfo>> {
        Ok(Some(OwnerInfo {
            instance_id: self.instance_id.to_string(),
            session_id: "null".to_string(),
            locked_at: jobslib_core::time::now_unix(),
            lease_expires_at: i64::MAX,
        }))
    }
}

/// `locks` table row state: held (lease not yet expired), in its
/// post-invalidation `lock_delay` grace window, or free.
async fn open_pool(db_path: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .pragma("busy_timeout", "5000");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .map_err(|e| LockError::Transport(format!("failed to open lock db: {e}")))?;

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
    .map_err(|e| LockError::Transport(format!("failed to create locks table: {e}")))?;

    Ok(pool)
}

/// Session/lease lock backed by a single SQLite table, generalizing a
/// distributed lock manager's lease-row model to a single-node KV store
/// and adding a `lock_delay` grace window after invalidation.
pub struct SqliteLock {
    pool: SqlitePool,
    instance_id: InstanceId,
}

impl SqliteLock {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        let instance_id = InstanceId::current();
        info!(%instance_id, "sqlite lock provider initialized");
        Ok(Self { pool, instance_id })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            instance_id: InstanceId::current(),
        }
    }
}

#[async_trait]
impl LockProvider for SqliteLock {
    async fn acquire(&self, opts: &LockOptions) -> Result<Option<Lease>> {
        let now = jobslib_core::time::now_unix();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LockError::Transport(format!("begin acquire tx: {e}")))?;

        let row = sqlx::query("SELECT lease_expires_at, lock_delay_until FROM locks WHERE key = ?")
            .bind(&opts.key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| LockError::Transport(format!("read lock row: {e}")))?;

        if let Some(row) = row {
            let lease_expires_at: i64 = row.get("lease_expires_at");
            let lock_delay_until: Option<i64> = row.get("lock_delay_until");

            if lease_expires_at > now {
                debug!(key = %opts.key, "lock held by another session");
                tx.rollback()
                    .await
                    .map_err(|e| LockError::Transport(format!("rollback acquire tx: {e}")))?;
                return Ok(None);
            }
            if let Some(until) = lock_delay_until {
                if until > now {
                    debug!(key = %opts.key, "lock in lock_delay grace window");
                    tx.rollback()
                        .await
                        .map_err(|e| LockError::Transport(format!("rollback acquire tx: {e}")))?;
                    return Ok(None);
                }
            }
        }

        let session_id = Id::new().to_string();
        let lease_expires_at = now + opts.ttl as i64;

        sqlx::query(
            r#"
            INSERT INTO locks (key, session_id, instance_id, locked_at, lease_expires_at, lock_delay_until)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT(key) DO UPDATE SET
                session_id = excluded.session_id,
                instance_id = excluded.instance_id,
                locked_at = excluded.locked_at,
                lease_expires_at = excluded.lease_expires_at,
                lock_delay_until = NULL
            "#,
        )
        .bind(&opts.key)
        .bind(&session_id)
        .bind(self.instance_id.as_str())
        .bind(now)
        .bind(lease_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| LockError::Transport(format!("write lock row: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| LockError::Transport(format!("commit acquire tx: {e}")))?;

        info!(key = %opts.key, %session_id, "lock acquired");
        Ok(Some(Lease {
            key: opts.key.clone(),
            session_id,
            ttl: Duration::from_secs(opts.ttl),
            lock_delay: Duration::from_secs(opts.lock_delay),
        }))
    }

    async fn release(&self, lease: &Lease) -> Result<bool> {
        let now = jobslib_core::time::now_unix();
        let lock_delay_until = now + lease.lock_delay.as_secs() as i64;

        let result = sqlx::query(
            r#"
            UPDATE locks
            SET lease_expires_at = 0, lock_delay_until = ?
            WHERE key = ? AND session_id = ?
            "#,
        )
        .bind(lock_delay_until)
        .bind(&lease.key)
        .bind(&lease.session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Transport(format!("release lock row: {e}")))?;

        if result.rows_affected() > 0 {
            info!(key = %lease.key, "lock released");
        } else {
            warn!(key = %lease.key, "release called on a lease we no longer hold");
        }
        // Idempotent: a lease that's already gone is not an error.
        Ok(true)
    }

    async fn refresh(&self, lease: &Lease) -> Result<bool> {
        let now = jobslib_core::time::now_unix();
        let lease_expires_at = now + lease.ttl.as_secs() as i64;

        let result = sqlx::query(
            r#"
            UPDATE locks
            SET lease_expires_at = ?
            WHERE key = ? AND session_id = ? AND lease_expires_at > ?
            "#,
        )
        .bind(lease_expires_at)
        .bind(&lease.key)
        .bind(&lease.session_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Transport(format!("refresh lock row: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn owner_info(&self, opts: &LockOptions) -> Result<Option<OwnerInfo>> {
        let row = sqlx::query(
            "SELECT session_id, instance_id, locked_at, lease_expires_at FROM locks WHERE key = ?",
        )
        .bind(&opts.key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LockError::Transport(format!("read owner info: {e}")))?;

        Ok(row.map(|row| OwnerInfo {
            instance_id: row.get("instance_id"),
            session_id: row.get("session_id"),
            locked_at: row.get("locked_at"),
            lease_expires_at: row.get("lease_expires_at"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(key: &str, ttl: u64, lock_delay: u64) -> LockOptions {
        LockOptions {
            key: key.to_string(),
            ttl,
            lock_delay,
            backend: "sqlite".to_string(),
            disable_one_instance: false,
        }
    }

    #[tokio::test]
    async fn test_null_lock_always_acquires() {
        let lock = NullLock::new();
        let lease = lock.acquire(&opts("k", 30, 15)).await.unwrap();
        assert!(lease.is_some());
    }

    #[tokio::test]
    async fn test_acquire_then_contention() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());

        let lease = lock
            .acquire(&opts("job-a", 30, 15))
            .await
            .unwrap()
            .expect("first acquire should succeed");

        let contended = lock.acquire(&opts("job-a", 30, 15)).await.unwrap();
        assert!(contended.is_none(), "second acquire should be contended");

        assert!(lock.release(&lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());

        let lease = lock
            .acquire(&opts("job-b", 30, 0))
            .await
            .unwrap()
            .expect("acquire should succeed");

        assert!(lock.release(&lease).await.unwrap());
        assert!(lock.release(&lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_delay_blocks_reacquire_after_release() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());

        let lease = lock
            .acquire(&opts("job-c", 30, 60))
            .await
            .unwrap()
            .expect("acquire should succeed");
        lock.release(&lease).await.unwrap();

        let reacquired = lock.acquire(&opts("job-c", 30, 60)).await.unwrap();
        assert!(
            reacquired.is_none(),
            "lock_delay window should block immediate reacquisition"
        );
    }

    #[tokio::test]
    async fn test_refresh_extends_lease() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());

        let lease = lock
            .acquire(&opts("job-d", 30, 0))
            .await
            .unwrap()
            .expect("acquire should succeed");

        assert!(lock.refresh(&lease).await.unwrap());

        let owner = lock
            .owner_info(&opts("job-d", 30, 0))
            .await
            .unwrap()
            .expect("owner info should exist");
        assert_eq!(owner.session_id, lease.session_id);
    }

    #[tokio::test]
    async fn test_refresh_fails_for_stale_session() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());

        let lease = lock
            .acquire(&opts("job-e", 30, 0))
            .await
            .unwrap()
            .expect("acquire should succeed");
        lock.release(&lease).await.unwrap();

        // a stale lease (already superseded) must not be able to refresh
        assert!(!lock.refresh(&lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_owner_info_none_when_absent() {
        let db = jobslib_test::TestDb::new().await;
        let lock = SqliteLock::from_pool(db.pool.clone());
        assert!(lock.owner_info(&opts("missing", 30, 0)).await.unwrap().is_none());
    }
}

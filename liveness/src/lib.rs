//! ABOUTME: Liveness writer trait plus SQLite-backed and dummy implementations
//! ABOUTME: Advertises last successful job completion independent of lock state

use async_trait::async_trait;
use jobslib_config::LivenessOptions;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum LivenessError {
    #[error("liveness transport error: {0}")]
    Transport(String),
    #[error("liveness record not found for key {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LivenessError>;

/// `{fqdn, unix_ts, time_utc, time_local}`, same shape as the record the
/// original implementation's `get_state()` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessRecord {
    pub fqdn: String,
    pub unix_ts: i64,
    pub time_utc: String,
    pub time_local: String,
}

impl LivenessRecord {
    pub fn now() -> Self {
        let fqdn = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let unix_ts = jobslib_core::time::now_unix();
        Self {
            fqdn,
            unix_ts,
            time_utc: jobslib_core::time::to_utc(unix_ts),
            time_local: jobslib_core::time::to_local(unix_ts),
        }
    }
}

#[async_trait]
pub trait LivenessWriter: Send + Sync {
    async fn write(&self) -> Result<()>;
    async fn read(&self) -> Result<LivenessRecord>;
    async fn check(&self, max_age: Duration) -> Result<bool>;
}

/// In-memory backend used in tests and as the null default.
#[derive(Clone, Default)]
pub struct DummyLiveness {
    state: Arc<Mutex<Option<LivenessRecord>>>,
}

impl DummyLiveness {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LivenessWriter for DummyLiveness {
    async fn write(&self) -> Result<()> {
        *self.state.lock().await = Some(LivenessRecord::now());
        Ok(())
    }

    async fn read(&self) -> Result<LivenessRecord> {
        self.state
            .lock()
            .await
            .clone()
            .ok_or_else(|| LivenessError::NotFound("dummy".to_string()))
    }

    async fn check(&self, max_age: Duration) -> Result<bool> {
        let record = self.read().await?;
        let age = jobslib_core::time::now_unix() - record.unix_ts;
        Ok(age >= 0 && age as u64 <= max_age.as_secs())
    }
}

async fn open_pool(db_path: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .pragma("busy_timeout", "5000");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await
        .map_err(|e| LivenessError::Transport(format!("failed to open liveness db: {e}")))?;

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
    .map_err(|e| LivenessError::Transport(format!("failed to create liveness table: {e}")))?;

    Ok(pool)
}

/// One row per key, same connection-pool pattern as the lock backend.
pub struct SqliteLiveness {
    pool: SqlitePool,
    key: String,
}

impl SqliteLiveness {
    pub async fn new(db_path: &str, opts: &LivenessOptions) -> Result<Self> {
        let pool = open_pool(db_path).await?;
        info!(key = %opts.key, "sqlite liveness writer initialized");
        Ok(Self {
            pool,
            key: opts.key.clone(),
        })
    }

    pub fn from_pool(pool: SqlitePool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }
}

#[async_trait]
impl LivenessWriter for SqliteLiveness {
    async fn write(&self) -> Result<()> {
        let record = LivenessRecord::now();

        sqlx::query(
            r#"
            INSERT INTO liveness (key, fqdn, unix_ts, time_utc, time_local)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                fqdn = excluded.fqdn,
                unix_ts = excluded.unix_ts,
                time_utc = excluded.time_utc,
                time_local = excluded.time_local
            "#,
        )
        .bind(&self.key)
        .bind(&record.fqdn)
        .bind(record.unix_ts)
        .bind(&record.time_utc)
        .bind(&record.time_local)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "liveness write failed");
            LivenessError::Transport(format!("liveness write failed: {e}"))
        })?;

        debug!(key = %self.key, "liveness written");
        Ok(())
    }

    async fn read(&self) -> Result<LivenessRecord> {
        let row = sqlx::query(
            "SELECT fqdn, unix_ts, time_utc, time_local FROM liveness WHERE key = ?",
        )
        .bind(&self.key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LivenessError::Transport(format!("liveness read failed: {e}")))?;

        let row = row.ok_or_else(|| LivenessError::NotFound(self.key.clone()))?;
        Ok(LivenessRecord {
            fqdn: row.get("fqdn"),
            unix_ts: row.get("unix_ts"),
            time_utc: row.get("time_utc"),
            time_local: row.get("time_local"),
        })
    }

    async fn check(&self, max_age: Duration) -> Result<bool> {
        let record = self.read().await?;
        let age = jobslib_core::time::now_unix() - record.unix_ts;
        Ok(age >= 0 && age as u64 <= max_age.as_secs())
    }
}

//! ABOUTME: The job body contract: no output, re-entrant across iterations
//! ABOUTME: JobContext grants extend_lock() and config access, never the lock provider directly

use crate::watchdog::WatchdogHandle;
use async_trait::async_trait;
use jobslib_config::RunConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Any error from the user body converts the iteration to `Failed`.
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Closed set of outcomes for one run-loop iteration. `Unknown` is the
/// unreachable default, valid only before `Start` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    #[default]
    Unknown,
    Succeeded,
    Failed,
    Pending,
    Interrupted,
    Killed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Interrupted => "interrupted",
            Self::Killed => "killed",
        }
    }
}

/// Granted to the job body: read access to configuration, and the only
/// lever on the lock the body is allowed to touch — `extend_lock()`,
/// which flips a flag the watchdog acts on, never the provider itself.
pub struct JobContext {
    config: Arc<RunConfig>,
    watchdog: WatchdogHandle,
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(config: Arc<RunConfig>, watchdog: WatchdogHandle, cancellation: CancellationToken) -> Self {
        Self {
            config,
            watchdog,
            cancellation,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Request the watchdog renew the lease before its timer fires.
    /// Multiple calls before the next tick coalesce into one renewal.
    pub fn extend_lock(&self) {
        self.watchdog.extend_lock();
    }

    /// True once external termination has been requested. The job body
    /// may poll this at safe points; the run loop also races the body
    /// against termination directly, so polling is a courtesy, not a
    /// requirement.
    pub fn is_terminating(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &JobContext) -> std::result::Result<(), JobError>;
}

//! ABOUTME: The run error taxonomy the loop converges every failure mode into

/// Kinds of failure the run loop can surface to its caller.
#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("improperly configured: {0}")]
    ImproperlyConfigured(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("watchdog expired before the lease could be renewed")]
    WatchdogExpired,
    #[error("termination requested")]
    TerminateRequested,
    #[error("job failed: {0}")]
    JobFailure(String),
}

impl From<jobslib_core::Error> for RunError {
    fn from(err: jobslib_core::Error) -> Self {
        RunError::ImproperlyConfigured(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

//! ABOUTME: The central state machine: Start -> Acquire -> [Held|NotHeld] -> [Run|Skip] -> Report -> Sleep? -> End|Start
//! ABOUTME: Owns all status reporting; every iteration pushes exactly one metrics batch, win or lose

use crate::error::{Result, RunError};
use crate::job::{Job, JobContext, JobStatus};
use crate::watchdog::Watchdog;
use jobslib_config::RunConfig;
use jobslib_core::time::{now_unix, sleep_cancellable};
use jobslib_liveness::LivenessWriter;
use jobslib_lock::{Lease, LockProvider};
use jobslib_metrics::{MetricPoint, MetricsSink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives one job through repeated iterations of the state machine, or
/// exactly one in `run_once` mode.
pub struct RunLoop {
    lock: Arc<dyn LockProvider>,
    liveness: Arc<dyn LivenessWriter>,
    metrics: Arc<dyn MetricsSink>,
    config: RunConfig,
}

impl RunLoop {
    pub fn new(
        lock: Arc<dyn LockProvider>,
        liveness: Arc<dyn LivenessWriter>,
        metrics: Arc<dyn MetricsSink>,
        config: RunConfig,
    ) -> Self {
        Self {
            lock,
            liveness,
            metrics,
            config,
        }
    }

    pub async fn run(&self, job: &dyn Job, cancellation: CancellationToken) -> Result<()> {
        loop {
            match self.run_once(job, &cancellation).await {
                Iteration::Continue => continue,
                Iteration::End(result) => return result,
            }
        }
    }

    async fn run_once(&self, job: &dyn Job, cancellation: &CancellationToken) -> Iteration {
        // 1. Start.
        let iter_start = tokio::time::Instant::now();
        let start_ts = now_unix();

        if cancellation.is_cancelled() {
            return Iteration::End(Err(RunError::TerminateRequested));
        }

        // 2. Acquire.
        let lease = match self.lock.acquire(&self.config.lock).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(error = %e, "lock transport error; treating as not acquired");
                None
            }
        };

        let Some(lease) = lease else {
            // NotHeld -> Skip.
            if let Ok(Some(owner)) = self.lock.owner_info(&self.config.lock).await {
                debug!(owner = %owner.instance_id, "lock held by another owner");
            }
            self.report(job, JobStatus::Pending, None, start_ts, iter_start)
                .await;
            return self
                .decide(JobStatus::Pending, start_ts, cancellation, None)
                .await;
        };

        // Held -> Run, racing the watchdog and termination against the body.
        let watchdog = Watchdog::new();
        let handle = watchdog.handle();
        let ctx = JobContext::new(
            Arc::new(self.config.clone()),
            handle,
            cancellation.clone(),
        );

        let status = {
            let watchdog_fut = watchdog.run(lease.ttl, self.lock.as_ref(), &lease);
            let term_fut = cancellation.cancelled();
            let job_fut = job.run(&ctx);

            tokio::select! {
                biased;
                _ = term_fut => JobStatus::Killed,
                _ = watchdog_fut => {
                    warn!(key = %lease.key, "watchdog expired before lease renewal");
                    JobStatus::Interrupted
                }
                result = job_fut => match result {
                    Ok(()) => JobStatus::Succeeded,
                    Err(e) => {
                        warn!(error = %e.0, "job body failed");
                        JobStatus::Failed
                    }
                },
            }
        };

        // 5. Lock disposition.
        let kept = self.dispose_lock(&lease, status).await;

        let last_success_ts = (status == JobStatus::Succeeded).then(now_unix);

        // 6. Report.
        self.report(job, status, last_success_ts, start_ts, iter_start)
            .await;

        if status == JobStatus::Killed {
            return Iteration::End(Err(RunError::TerminateRequested));
        }

        self.decide(status, start_ts, cancellation, kept.then_some(&lease))
            .await
    }

    /// Returns whether the lease was retained (kept held past this call).
    async fn dispose_lock(&self, lease: &Lease, status: JobStatus) -> bool {
        if self.config.run_once {
            let _ = self.lock.release(lease).await;
            return false;
        }

        let should_keep = match status {
            JobStatus::Killed => false,
            JobStatus::Succeeded => self.config.keep_lock,
            JobStatus::Failed => !self.config.release_on_error && self.config.keep_lock,
            JobStatus::Interrupted | JobStatus::Pending | JobStatus::Unknown => false,
        };

        if should_keep {
            if let Err(e) = self.lock.refresh(lease).await {
                warn!(error = %e, "failed to refresh kept lease");
            }
        } else {
            let _ = self.lock.release(lease).await;
        }
        should_keep
    }

    async fn report(
        &self,
        job: &dyn Job,
        status: JobStatus,
        last_success_ts: Option<i64>,
        start_ts: i64,
        iter_start: tokio::time::Instant,
    ) {
        if status == JobStatus::Succeeded {
            if let Err(e) = self.liveness.write().await {
                warn!(error = %e, "liveness write failed");
            }
        }

        let duration = iter_start.elapsed().as_secs_f64();
        let mut points = vec![MetricPoint::new("job_duration_seconds", duration)
            .with_tag("status", status.as_str())
            .with_tag("type", "task")];
        if let Some(ts) = last_success_ts {
            points.push(MetricPoint::new("last_successful_run_timestamp", ts as f64));
        }

        // Metrics push is the last, unconditional, best-effort side effect
        // of every iteration; its failure never changes `status`.
        if let Err(e) = self.metrics.push(job.name(), &points).await {
            warn!(error = %e, "metrics push failed");
        }

        info!(
            status = status.as_str(),
            duration_ms = (duration * 1000.0) as u64,
            start_ts,
            "run loop iteration complete"
        );
    }

    async fn decide(
        &self,
        status: JobStatus,
        start_ts: i64,
        cancellation: &CancellationToken,
        kept_lease: Option<&Lease>,
    ) -> Iteration {
        match status {
            JobStatus::Failed if self.config.run_once => {
                return Iteration::End(Err(RunError::JobFailure(
                    "job body returned an error".to_string(),
                )))
            }
            JobStatus::Interrupted if self.config.run_once => {
                return Iteration::End(Err(RunError::WatchdogExpired))
            }
            _ if self.config.run_once => return Iteration::End(Ok(())),
            _ => {}
        }

        let sleep_for = if self.config.sleep_interval > 0 {
            Duration::from_secs(self.config.sleep_interval)
        } else {
            let elapsed = now_unix() - start_ts;
            let remaining = self.config.run_interval as i64 - elapsed;
            Duration::from_secs(remaining.max(0) as u64)
        };

        let slept = if let Some(lease) = kept_lease {
            self.sleep_keeping_lock(lease, sleep_for, cancellation)
                .await
        } else {
            sleep_cancellable(sleep_for, cancellation).await
        };

        if slept {
            Iteration::Continue
        } else {
            Iteration::End(Err(RunError::TerminateRequested))
        }
    }

    /// Sleeps for `sleep_for`, refreshing the held lease every second so it
    /// survives the gap, then releases it before returning to Start. Returns
    /// `false` if cancelled mid-sleep; the lease is left held in that case,
    /// since termination handling is only installed for step 4 (Run) and
    /// the loop is ending rather than looping back to a fresh `acquire`.
    async fn sleep_keeping_lock(
        &self,
        lease: &Lease,
        sleep_for: Duration,
        cancellation: &CancellationToken,
    ) -> bool {
        const TICK: Duration = Duration::from_secs(1);
        let mut remaining = sleep_for;

        while remaining > Duration::ZERO {
            let tick = remaining.min(TICK);
            if !sleep_cancellable(tick, cancellation).await {
                return false;
            }
            remaining -= tick;

            if remaining > Duration::ZERO {
                match self.lock.refresh(lease).await {
                    Ok(false) => warn!(key = %lease.key, "kept lease stale during sleep refresh"),
                    Err(e) => warn!(error = %e, "failed to refresh kept lease during sleep"),
                    Ok(true) => {}
                }
            }
        }

        let _ = self.lock.release(lease).await;
        true
    }
}

enum Iteration {
    Continue,
    End(Result<()>),
}

//! ABOUTME: TTL timer coupled to the lock lease; cooperative abort on expiry
//! ABOUTME: extend_lock() sets a flag; the actual refresh runs inside the timer tick

use jobslib_lock::{Lease, LockProvider};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Shared {
    extend_requested: AtomicBool,
    notify: Notify,
    expired: AtomicBool,
}

/// Owns the abort state for one held lease. Armed for the duration of
/// the job body only; dropping it (by letting `run` go out of scope)
/// disarms it.
pub struct Watchdog {
    shared: Arc<Shared>,
}

/// The only handle the job body receives. Setting the flag never talks
/// to the lock provider directly — the timer tick does that, keeping
/// the body's view of the world synchronous.
#[derive(Clone)]
pub struct WatchdogHandle {
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    pub fn extend_lock(&self) {
        self.shared.extend_requested.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }

    pub fn expired(&self) -> bool {
        self.shared.expired.load(Ordering::SeqCst)
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                extend_requested: AtomicBool::new(false),
                notify: Notify::new(),
                expired: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> WatchdogHandle {
        WatchdogHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs the arm/extend/trip loop for one held lease. Resolves once
    /// the timer fires with no pending extend — i.e. once the watchdog
    /// trips. No renewal path extends the lease beyond a single `ttl`
    /// at a time: each tick either trips or re-arms for exactly `ttl`.
    pub async fn run(&self, ttl: Duration, lock: &dyn LockProvider, lease: &Lease) {
        let mut deadline = Instant::now() + ttl;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    if self.shared.extend_requested.swap(false, Ordering::SeqCst) {
                        match lock.refresh(lease).await {
                            Ok(true) => debug!(key = %lease.key, "watchdog renewed lease"),
                            Ok(false) => warn!(key = %lease.key, "watchdog refresh found no matching lease"),
                            Err(e) => warn!(key = %lease.key, error = %e, "watchdog refresh failed"),
                        }
                        deadline = Instant::now() + ttl;
                    } else {
                        self.shared.expired.store(true, Ordering::SeqCst);
                        return;
                    }
                }
                _ = self.shared.notify.notified() => {
                    // Woken by extend_lock(); the pending flag is consumed
                    // at the next deadline tick above, coalescing any
                    // number of calls made before that tick into one
                    // renewal.
                }
            }
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

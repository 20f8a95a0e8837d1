//! ABOUTME: The run loop, job contract, watchdog, and termination handling
//! ABOUTME: Everything a CLI or embedder needs to drive one job to completion

pub mod error;
pub mod job;
pub mod run_loop;
pub mod termination;
pub mod watchdog;

pub use error::{Result, RunError};
pub use job::{Job, JobContext, JobError, JobStatus};
pub use run_loop::RunLoop;
pub use watchdog::{Watchdog, WatchdogHandle};

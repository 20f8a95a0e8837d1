//! ABOUTME: Example jobs used to exercise the run loop end to end
//! ABOUTME: Registered into the CLI's job registry under their `name()`

use async_trait::async_trait;
use jobslib_runtime::{Job, JobContext, JobError};
use std::time::Duration;

/// A registered job's name paired with its constructor.
pub type JobEntry = (&'static str, fn() -> Box<dyn Job>);

/// Prints a greeting and exits; typically run with `--run-once`.
pub struct HelloWorld;

#[async_trait]
impl Job for HelloWorld {
    fn name(&self) -> &str {
        "helloworld"
    }

    async fn run(&self, _ctx: &JobContext) -> Result<(), JobError> {
        let yourname = std::env::var("JOBSLIB_DEMO_NAME").unwrap_or_else(|_| "World".to_string());
        println!("Hello {yourname}!");
        Ok(())
    }
}

/// Counts down from 10, extending the lease each tick, stopping early if
/// termination is requested. Meant to be run without `--run-once` to
/// demonstrate one-instance contention.
pub struct OneInstance;

#[async_trait]
impl Job for OneInstance {
    fn name(&self) -> &str {
        "oneinstance"
    }

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError> {
        for i in (1..=10).rev() {
            if ctx.is_terminating() {
                break;
            }
            print!("\r[{}] {i}\x1b[K", std::process::id());
            use std::io::Write;
            std::io::stdout().flush().ok();
            tokio::time::sleep(Duration::from_secs(5)).await;
            ctx.extend_lock();
        }
        println!("\r\x1b[K");
        Ok(())
    }
}

/// Jobs available to the CLI's positional task argument.
pub fn registry() -> Vec<JobEntry> {
    vec![
        ("helloworld", || Box::new(HelloWorld) as Box<dyn Job>),
        ("oneinstance", || Box::new(OneInstance) as Box<dyn Job>),
    ]
}

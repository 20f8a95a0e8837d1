use clap::Parser;
use jobslib_config::{CliOverrides, RunConfig};
use jobslib_core::telemetry;
use jobslib_liveness::{DummyLiveness, LivenessWriter, SqliteLiveness};
use jobslib_lock::{LockProvider, NullLock, SqliteLock};
use jobslib_metrics::{DummyMetrics, InfluxDbMetrics, MetricsSink, PrometheusMetrics};
use jobslib_runtime::RunLoop;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "runjob")]
#[command(about = "Runs a jobslib task")]
struct Cli {
    /// Task to run: a registered job name, or the built-in `check-liveness`.
    task: String,

    /// Settings file (TOML). Also settable via JOBSLIB_SETTINGS_MODULE.
    #[arg(short, long, value_name = "PATH")]
    settings: Option<PathBuf>,

    /// Force the null lock provider.
    #[arg(long)]
    disable_one_instance: bool,

    /// Single iteration then exit.
    #[arg(long)]
    run_once: bool,

    /// Fixed gap after each run.
    #[arg(long)]
    sleep_interval: Option<u64>,

    /// Target period between run starts; mutually exclusive with sleep-interval.
    #[arg(long)]
    run_interval: Option<u64>,

    /// Hold the lease during the inter-iteration sleep.
    #[arg(long)]
    keep_lock: bool,

    /// Release the lease if the job body raises.
    #[arg(long)]
    release_on_error: bool,

    /// SQLite file backing the lock and liveness tables.
    #[arg(long, default_value = "jobslib.db")]
    db_path: String,

    /// Maximum liveness age in seconds, for the `check-liveness` task.
    #[arg(long)]
    max_age: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing(
        &std::env::var("JOBSLIB_ENV").unwrap_or_else(|_| "development".to_string()),
        "jobslib",
    );

    let cli = Cli::parse();

    // `--sleep-interval` alone must clear the default `run_interval` (60)
    // rather than leaving it to collide with the validator's mutual-
    // exclusion check; only explicitly passing both flags is an error.
    let run_interval = match (cli.sleep_interval, cli.run_interval) {
        (Some(_), None) => Some(0),
        (_, run_interval) => run_interval,
    };

    let overrides = CliOverrides {
        run_once: cli.run_once.then_some(true),
        sleep_interval: cli.sleep_interval,
        run_interval,
        keep_lock: cli.keep_lock.then_some(true),
        release_on_error: cli.release_on_error.then_some(true),
        disable_one_instance: cli.disable_one_instance.then_some(true),
        lock_key: Some(cli.task.clone()),
    };

    let config = match RunConfig::load(cli.settings.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "improperly configured");
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if cli.task == "check-liveness" {
        return check_liveness(&config, &cli).await;
    }

    let job_fn = jobslib_demos::registry()
        .into_iter()
        .find(|(name, _)| *name == cli.task)
        .map(|(_, f)| f);

    let Some(job_fn) = job_fn else {
        eprintln!("error: unknown task `{}`", cli.task);
        return ExitCode::from(2);
    };
    let job = job_fn();

    let lock: Arc<dyn LockProvider> = if config.lock.disable_one_instance {
        Arc::new(NullLock::new())
    } else {
        match SqliteLock::new(&cli.db_path).await {
            Ok(lock) => Arc::new(lock),
            Err(e) => {
                tracing::error!(error = %e, "failed to open lock database");
                return ExitCode::from(2);
            }
        }
    };

    let liveness: Arc<dyn LivenessWriter> = if config.liveness.backend == "dummy" {
        Arc::new(DummyLiveness::new())
    } else {
        match SqliteLiveness::new(&cli.db_path, &config.liveness).await {
            Ok(liveness) => Arc::new(liveness),
            Err(e) => {
                tracing::error!(error = %e, "failed to open liveness database");
                return ExitCode::from(2);
            }
        }
    };

    let metrics: Arc<dyn MetricsSink> = match config.metrics.backend.as_str() {
        "prometheus" => Arc::new(PrometheusMetrics::new(&config.metrics)),
        "influxdb" => Arc::new(InfluxDbMetrics::new(&config.metrics)),
        _ => Arc::new(DummyMetrics::new()),
    };

    let cancellation = jobslib_runtime::termination::install();
    let run_loop = RunLoop::new(lock, liveness, metrics, config);

    match run_loop.run(job.as_ref(), cancellation).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "job run failed");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn check_liveness(config: &RunConfig, cli: &Cli) -> ExitCode {
    let liveness: Arc<dyn LivenessWriter> = if config.liveness.backend == "dummy" {
        Arc::new(DummyLiveness::new())
    } else {
        match SqliteLiveness::new(&cli.db_path, &config.liveness).await {
            Ok(liveness) => Arc::new(liveness),
            Err(e) => {
                tracing::error!(error = %e, "failed to open liveness database");
                return ExitCode::from(2);
            }
        }
    };

    let max_age = Duration::from_secs(cli.max_age.unwrap_or(60));
    match liveness.check(max_age).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "check-liveness failed");
            ExitCode::from(1)
        }
    }
}

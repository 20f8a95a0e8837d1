//! ABOUTME: Layered run configuration with validation and environment loading
//! ABOUTME: CLI overrides > environment (JOBSLIB_*) > settings file > defaults

use config::{Config as ConfigBuilder, Environment, File};
use jobslib_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::{Validate, ValidationError};

/// Lock provider options, read by `jobslib-lock`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LockOptions {
    #[validate(length(min = 1))]
    pub key: String,
    #[validate(range(min = 10, max = 86400))]
    pub ttl: u64,
    #[validate(range(min = 0, max = 60))]
    pub lock_delay: u64,
    pub backend: String,
    pub disable_one_instance: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            key: "jobslib".to_string(),
            ttl: 30,
            lock_delay: 15,
            backend: "sqlite".to_string(),
            disable_one_instance: false,
        }
    }
}

/// Liveness writer options, read by `jobslib-liveness`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct LivenessOptions {
    #[validate(length(min = 1))]
    pub key: String,
    pub backend: String,
}

impl Default for LivenessOptions {
    fn default() -> Self {
        Self {
            key: "jobslib".to_string(),
            backend: "sqlite".to_string(),
        }
    }
}

/// Prometheus pushgateway options.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct PrometheusOptions {
    pub pushgateway_url: String,
}

/// InfluxDB line-protocol options, matching the original backend's
/// `host/port/username/password/database` shape.
#[derive(Clone, Deserialize, Serialize, Validate)]
pub struct InfluxDbOptions {
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    #[validate(range(min = 1, max = 300))]
    pub timeout: u64,
}

impl std::fmt::Debug for InfluxDbOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfluxDbOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for InfluxDbOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8086,
            username: String::new(),
            password: String::new(),
            database: "jobslib".to_string(),
            timeout: 10,
        }
    }
}

/// Metrics sink options, read by `jobslib-metrics`.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
pub struct MetricsOptions {
    pub backend: String,
    #[validate(nested)]
    pub prometheus: PrometheusOptions,
    #[validate(nested)]
    pub influxdb: InfluxDbOptions,
}

/// Resolved, immutable run configuration. Frozen once at startup.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_interval_exclusivity"))]
pub struct RunConfig {
    pub run_once: bool,
    pub sleep_interval: u64,
    pub run_interval: u64,
    pub keep_lock: bool,
    pub release_on_error: bool,
    #[validate(nested)]
    pub lock: LockOptions,
    #[validate(nested)]
    pub liveness: LivenessOptions,
    #[validate(nested)]
    pub metrics: MetricsOptions,
}

fn validate_interval_exclusivity(cfg: &RunConfig) -> std::result::Result<(), ValidationError> {
    if cfg.sleep_interval > 0 && cfg.run_interval > 0 {
        return Err(ValidationError::new(
            "sleep_interval and run_interval are mutually exclusive",
        ));
    }
    Ok(())
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_once: false,
            sleep_interval: 0,
            run_interval: 60,
            keep_lock: false,
            release_on_error: true,
            lock: LockOptions::default(),
            liveness: LivenessOptions::default(),
            metrics: MetricsOptions::default(),
        }
    }
}

/// Overrides collected from CLI flags, the highest-priority source.
/// `jobslib-cli` fills this in from `clap` matches and hands it to
/// [`RunConfig::load`] rather than this crate depending on `clap`.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub run_once: Option<bool>,
    pub sleep_interval: Option<u64>,
    pub run_interval: Option<u64>,
    pub keep_lock: Option<bool>,
    pub release_on_error: Option<bool>,
    pub disable_one_instance: Option<bool>,
    pub lock_key: Option<String>,
}

impl RunConfig {
    /// Load and validate a `RunConfig`, layering CLI overrides over
    /// environment (`JOBSLIB_*`) over an optional TOML settings file
    /// over built-in defaults.
    pub fn load(settings_path: Option<&Path>, overrides: CliOverrides) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        builder = builder
            .set_default("run_once", false)?
            .set_default("sleep_interval", 0u64)?
            .set_default("run_interval", 60u64)?
            .set_default("keep_lock", false)?
            .set_default("release_on_error", true)?
            .set_default("lock.key", "jobslib")?
            .set_default("lock.ttl", 30u64)?
            .set_default("lock.lock_delay", 15u64)?
            .set_default("lock.backend", "sqlite")?
            .set_default("lock.disable_one_instance", false)?
            .set_default("liveness.key", "jobslib")?
            .set_default("liveness.backend", "sqlite")?
            .set_default("metrics.backend", "dummy")?
            .set_default("metrics.prometheus.pushgateway_url", "")?
            .set_default("metrics.influxdb.host", "localhost")?
            .set_default("metrics.influxdb.port", 8086)?
            .set_default("metrics.influxdb.username", "")?
            .set_default("metrics.influxdb.password", "")?
            .set_default("metrics.influxdb.database", "jobslib")?
            .set_default("metrics.influxdb.timeout", 10u64)?;

        if let Some(path) = settings_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Double underscore nests into a sub-table (`LOCK__TTL` -> `lock.ttl`);
        // a single underscore stays part of the key, so flat multi-word
        // fields like `RUN_ONCE` and `SLEEP_INTERVAL` are left alone.
        builder = builder.add_source(
            Environment::with_prefix("JOBSLIB")
                .prefix_separator("_")
                .try_parsing(true)
                .separator("__"),
        );

        if let Some(v) = overrides.run_once {
            builder = builder.set_override("run_once", v)?;
        }
        if let Some(v) = overrides.sleep_interval {
            builder = builder.set_override("sleep_interval", v)?;
        }
        if let Some(v) = overrides.run_interval {
            builder = builder.set_override("run_interval", v)?;
        }
        if let Some(v) = overrides.keep_lock {
            builder = builder.set_override("keep_lock", v)?;
        }
        if let Some(v) = overrides.release_on_error {
            builder = builder.set_override("release_on_error", v)?;
        }
        if let Some(v) = overrides.disable_one_instance {
            builder = builder.set_override("lock.disable_one_instance", v)?;
        }
        if let Some(v) = overrides.lock_key {
            builder = builder.set_override("lock.key", v)?;
        }

        let built = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build config: {e}")))?;

        let parsed: RunConfig = built
            .try_deserialize()
            .map_err(|e| Error::Config(format!("failed to deserialize config: {e}")))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("config validation failed: {e}")))?;

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_validate() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let cfg = RunConfig::load(None, CliOverrides::default()).expect("defaults should load");
        assert_eq!(cfg.lock.ttl, 30);
        assert_eq!(cfg.run_interval, 60);
        assert_eq!(cfg.sleep_interval, 0);
    }

    #[test]
    fn test_cli_override_wins_over_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let overrides = CliOverrides {
            run_once: Some(true),
            lock_key: Some("custom-key".to_string()),
            ..Default::default()
        };
        let cfg = RunConfig::load(None, overrides).expect("should load");
        assert!(cfg.run_once);
        assert_eq!(cfg.lock.key, "custom-key");
    }

    #[test]
    fn test_env_override() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var("JOBSLIB_LOCK__TTL", "45");
        let cfg = RunConfig::load(None, CliOverrides::default()).expect("should load");
        std::env::remove_var("JOBSLIB_LOCK__TTL");
        assert_eq!(cfg.lock.ttl, 45);
    }

    #[test]
    fn test_settings_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "run_interval = 120\n[lock]\nkey = \"from-file\"\n").unwrap();
        let cfg = RunConfig::load(Some(&path), CliOverrides::default()).expect("should load");
        assert_eq!(cfg.run_interval, 120);
        assert_eq!(cfg.lock.key, "from-file");
    }

    #[test]
    fn test_ttl_out_of_range_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var("JOBSLIB_LOCK__TTL", "5");
        let result = RunConfig::load(None, CliOverrides::default());
        std::env::remove_var("JOBSLIB_LOCK__TTL");
        assert!(result.is_err());
    }

    #[test]
    fn test_mutually_exclusive_intervals_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var("JOBSLIB_SLEEP_INTERVAL", "5");
        std::env::set_var("JOBSLIB_RUN_INTERVAL", "5");
        let result = RunConfig::load(None, CliOverrides::default());
        std::env::remove_var("JOBSLIB_SLEEP_INTERVAL");
        std::env::remove_var("JOBSLIB_RUN_INTERVAL");
        assert!(result.is_err());
    }
}

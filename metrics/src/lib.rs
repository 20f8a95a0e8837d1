//! ABOUTME: Metrics sink trait plus Prometheus-pushgateway, InfluxDB, and dummy sinks
//! ABOUTME: push() delivery is best-effort and never changes job status

use async_trait::async_trait;
use jobslib_config::MetricsOptions;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("metrics transport error: {0}")]
    Transport(String),
    #[error("point tag `task` is reserved for the job name")]
    ReservedTag,
}

pub type Result<T> = std::result::Result<T, MetricsError>;

/// `{name, value, tags, ts}`. The sink injects the reserved `task` tag;
/// a point that already carries one is rejected before it ever reaches
/// the wire.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
    pub ts: Option<i64>,
}

impl MetricPoint {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
            ts: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_ts(mut self, ts: i64) -> Self {
        self.ts = Some(ts);
        self
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Deliver a batch for `task`, tagging every point with it. Called
    /// exactly once per run-loop iteration, after the outcome is known.
    async fn push(&self, task: &str, points: &[MetricPoint]) -> Result<()>;
}

fn check_no_reserved_tag(points: &[MetricPoint]) -> Result<()> {
    if points.iter().any(|p| p.tags.contains_key("task")) {
        return Err(MetricsError::ReservedTag);
    }
    Ok(())
}

/// Logs and drops. The zero-config default and the test backend.
#[derive(Default)]
pub struct DummyMetrics;

impl DummyMetrics {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsSink for DummyMetrics {
    async fn push(&self, task: &str, points: &[MetricPoint]) -> Result<()> {
        check_no_reserved_tag(points)?;
        for point in points {
            debug!(task, name = %point.name, value = point.value, "metric point (dummy sink)");
        }
        Ok(())
    }
}

/// Encodes points into a fresh `prometheus_client` registry per push (one
/// gauge per point name) and POSTs the text exposition format to a
/// pushgateway, the push-based counterpart of a pull registry encoder.
pub struct PrometheusMetrics {
    client: reqwest::Client,
    pushgateway_url: String,
}

impl PrometheusMetrics {
    pub fn new(opts: &MetricsOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            pushgateway_url: opts.prometheus.pushgateway_url.clone(),
        }
    }

    fn encode(&self, task: &str, points: &[MetricPoint]) -> Result<String> {
        let mut registry = Registry::default();
        for point in points {
            let gauge: Gauge<f64, std::sync::atomic::AtomicU64> = Gauge::default();
            gauge.set(point.value);
            let label = format!("{task}_{}", point.name);
            registry.register(label, format!("jobslib metric {}", point.name), gauge);
        }

        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| MetricsError::Transport(format!("failed to encode metrics: {e}")))?;
        Ok(buffer)
    }
}

#[async_trait]
impl MetricsSink for PrometheusMetrics {
    async fn push(&self, task: &str, points: &[MetricPoint]) -> Result<()> {
        check_no_reserved_tag(points)?;
        let body = self.encode(task, points)?;

        let url = format!("{}/metrics/job/{task}", self.pushgateway_url);
        let response = self
            .client
            .post(&url)
            .body(body)
            .send()
            .await
            .map_err(|e| MetricsError::Transport(format!("pushgateway request failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "pushgateway returned non-success status");
        }
        Ok(())
    }
}

/// Writes points as InfluxDB line protocol to `/write`, matching the
/// original backend's `host/port/username/password/database` options.
pub struct InfluxDbMetrics {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl InfluxDbMetrics {
    pub fn new(opts: &MetricsOptions) -> Self {
        let influx = &opts.influxdb;
        let url = format!(
            "http://{}:{}/write?db={}",
            influx.host, influx.port, influx.database
        );
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(influx.timeout))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url,
            username: influx.username.clone(),
            password: influx.password.clone(),
        }
    }

    fn line_protocol(task: &str, points: &[MetricPoint]) -> String {
        let mut lines = Vec::with_capacity(points.len());
        for point in points {
            let mut tags = format!("task={task}");
            for (k, v) in &point.tags {
                tags.push(',');
                tags.push_str(k);
                tags.push('=');
                tags.push_str(v);
            }
            let ts = point
                .ts
                .unwrap_or_else(jobslib_core::time::now_unix);
            lines.push(format!(
                "{},{tags} value={} {}",
                point.name, point.value, ts
            ));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl MetricsSink for InfluxDbMetrics {
    async fn push(&self, task: &str, points: &[MetricPoint]) -> Result<()> {
        check_no_reserved_tag(points)?;
        let body = Self::line_protocol(task, points);

        let mut request = self.client.post(&self.url).body(body);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetricsError::Transport(format!("influxdb write failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "influxdb returned non-success status");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dummy_push_succeeds() {
        let sink = DummyMetrics::new();
        let points = vec![MetricPoint::new("job_duration_seconds", 1.2).with_tag("status", "succeeded")];
        sink.push("helloworld", &points).await.unwrap();
    }

    #[tokio::test]
    async fn test_reserved_tag_rejected() {
        let sink = DummyMetrics::new();
        let points = vec![MetricPoint::new("x", 1.0).with_tag("task", "collision")];
        assert!(matches!(
            sink.push("helloworld", &points).await,
            Err(MetricsError::ReservedTag)
        ));
    }

    #[test]
    fn test_influx_line_protocol_format() {
        let points = vec![MetricPoint::new("job_duration_seconds", 1.5)
            .with_tag("status", "succeeded")
            .with_ts(1_700_000_000)];
        let line = InfluxDbMetrics::line_protocol("helloworld", &points);
        assert!(line.starts_with("job_duration_seconds,task=helloworld,status=succeeded value=1.5 1700000000"));
    }

    #[test]
    fn test_prometheus_encode_contains_metric_name() {
        let opts = MetricsOptions::default();
        let sink = PrometheusMetrics::new(&opts);
        let points = vec![MetricPoint::new("job_duration_seconds", 2.0)];
        let encoded = sink.encode("helloworld", &points).unwrap();
        assert!(encoded.contains("helloworld_job_duration_seconds"));
    }
}

//! Session gauges and their delivery to a Prometheus Pushgateway

use anyhow::{Context, Result};
use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry, Encoder, Gauge, GaugeVec,
    Registry, TextEncoder,
};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const FILEGROUP_LABEL: &str = "filegroup";
pub const OP_LABEL: &str = "op";

/// Operation measured per file group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Backup,
    Forget,
}

impl fmt::Display for SessionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOp::Backup => write!(f, "backup"),
            SessionOp::Forget => write!(f, "forget"),
        }
    }
}

/// Replace every character outside `[a-zA-Z0-9_]` with `_`
pub fn sanitize_label_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Gauges describing one session
#[derive(Clone)]
pub struct SessionMetrics {
    registry: Registry,
    success: Gauge,
    fail: Gauge,
    duration_total: Gauge,
    duration: GaugeVec,
}

impl SessionMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            success: register_gauge_with_registry!(
                "restic_session_success",
                "Indicates if session was successfully completed",
                registry,
            )?,
            fail: register_gauge_with_registry!(
                "restic_session_fail",
                "Indicates if session failed",
                registry,
            )?,
            duration_total: register_gauge_with_registry!(
                "restic_session_duration_seconds_total",
                "Seconds taken to complete restic session",
                registry,
            )?,
            duration: register_gauge_vec_with_registry!(
                "restic_session_duration_seconds",
                "Seconds taken to complete restic session for a file group",
                &[FILEGROUP_LABEL, OP_LABEL],
                registry,
            )?,
            registry,
        })
    }

    /// Record how long one operation on a file group took
    pub fn observe(&self, path: &str, op: SessionOp, elapsed: Duration) {
        let filegroup = sanitize_label_value(path);
        let op = op.to_string();
        self.duration
            .with_label_values(&[filegroup.as_str(), op.as_str()])
            .set(elapsed.as_secs_f64());
    }

    /// Record the session outcome and total duration
    pub fn finish(&self, succeeded: bool, elapsed: Duration) {
        if succeeded {
            self.success.set(1.0);
            self.fail.set(0.0);
        } else {
            self.success.set(0.0);
            self.fail.set(1.0);
        }
        self.duration_total.set(elapsed.as_secs_f64());
    }

    pub fn duration_of(&self, path: &str, op: SessionOp) -> Option<f64> {
        let filegroup = sanitize_label_value(path);
        let op = op.to_string();
        self.duration
            .get_metric_with_label_values(&[filegroup.as_str(), op.as_str()])
            .ok()
            .map(|g| g.get())
    }

    /// Text exposition of every gauge
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }
}

/// Pushgateway job name and grouping labels for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub job: String,
    pub grouping: Vec<(String, String)>,
}

impl PushTarget {
    /// Path below the gateway URL: `/metrics/job/<job>/<label>/<value>...`
    pub fn path(&self) -> String {
        let mut path = format!("/metrics/job/{}", self.job);
        for (label, value) in &self.grouping {
            path.push('/');
            path.push_str(label);
            path.push('/');
            path.push_str(value);
        }
        path
    }
}

/// Delivery of encoded metrics, enabling mocking in tests
pub trait MetricsPusher: Send + Sync {
    fn push(&self, target: &PushTarget, body: &str) -> Result<()>;
}

/// Pushgateway client replacing the job's group on every push
pub struct PushgatewayClient {
    url: String,
    timeout: Duration,
}

impl PushgatewayClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl MetricsPusher for PushgatewayClient {
    fn push(&self, target: &PushTarget, body: &str) -> Result<()> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let url = format!("{}{}", self.url, target.path());
        let response = client
            .put(&url)
            .header("Content-Type", TextEncoder::new().format_type())
            .body(body.to_string())
            .send()
            .with_context(|| format!("Failed to push metrics to {}", url))?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, "Metrics pushed");
            Ok(())
        } else {
            let body = response.text().unwrap_or_default();
            anyhow::bail!("Pushgateway returned status {}: {}", status, body)
        }
    }
}

/// Mock pusher for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub struct MockPusher {
        pub pushes: Arc<Mutex<Vec<(PushTarget, String)>>>,
        should_fail: Arc<Mutex<bool>>,
    }

    impl MockPusher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_failure(self) -> Self {
            *self.should_fail.lock().unwrap() = true;
            self
        }

        pub fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }

        pub fn last_push(&self) -> Option<(PushTarget, String)> {
            self.pushes.lock().unwrap().last().cloned()
        }
    }

    impl MetricsPusher for MockPusher {
        fn push(&self, target: &PushTarget, body: &str) -> Result<()> {
            self.pushes
                .lock()
                .unwrap()
                .push((target.clone(), body.to_string()));
            if *self.should_fail.lock().unwrap() {
                anyhow::bail!("Mock pushgateway unavailable");
            }
            Ok(())
        }
    }
}

//! Logging and metrics for the workflow executor
//!
//! Logs go through `tracing`. Metrics are emitted as structured events under
//! the `metrics` target so any subscriber can pick them up.

use std::collections::HashMap;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::config::LoggerSettings;
use crate::error::{EngineError, EngineResult};

/// Configuration for the telemetry system
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Name of the service
    pub service_name: String,
    /// Enable ANSI console output with targets
    pub enable_console: bool,
    /// Log level or filter directive, overridden by `RUST_LOG`
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "workflow-executor".to_string(),
            enable_console: true,
            log_level: "info".to_string(),
        }
    }
}

impl From<&LoggerSettings> for TelemetryConfig {
    fn from(settings: &LoggerSettings) -> Self {
        Self {
            log_level: settings.level.clone(),
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber
pub fn init_telemetry(config: TelemetryConfig) -> EngineResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if config.enable_console {
        builder.with_target(true).with_ansi(true).try_init()
    } else {
        builder.with_ansi(false).try_init()
    };
    result.map_err(|e| EngineError::Config(format!("Failed to initialize telemetry: {}", e)))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}

/// Add a single metric with tags
pub fn add_metric(name: &str, value: f64, tags: &[(&str, String)]) {
    let tags_str = tags
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

    tracing::info!(
        target: "metrics",
        metric_name = %name,
        metric_value = %value,
        metric_tags = %tags_str,
        "Recorded metric"
    );
}

/// Add multiple untagged metrics at once
pub fn add_metrics(metrics: HashMap<&'static str, f64>) {
    for (key, value) in metrics.iter() {
        add_metric(key, *value, &[]);
    }
}

/// Guard that records how long an operation took when dropped
#[derive(Debug)]
pub struct SpanDuration {
    name: &'static str,
    start: Instant,
}

impl Drop for SpanDuration {
    fn drop(&mut self) {
        tracing::debug!(
            target: "metrics",
            duration_ms = self.start.elapsed().as_millis() as f64,
            operation = self.name,
            "Operation completed"
        );
    }
}

/// Start measuring an operation
pub fn span_duration(name: &'static str) -> SpanDuration {
    SpanDuration {
        name,
        start: Instant::now(),
    }
}

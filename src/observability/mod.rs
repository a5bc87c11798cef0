//! # Observability
//!
//! Structured logging via the tracing ecosystem. The xDS snapshot engine
//! logs with structured fields (label, organization, version) so per-label
//! publication history can be traced back from the logs.

use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{Error, Result};

/// Initialize the global tracing subscriber.
///
/// `log_level` seeds the env-filter when `RUST_LOG` is not set; `json`
/// switches the output format to one JSON object per line.
pub fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| Error::config(format!("invalid log filter {log_level:?}: {e}")))?;

    let builder = fmt().with_env_filter(filter);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| Error::config(format!("failed to install tracing subscriber: {e}")))
}

/// Install the Prometheus metrics exporter. Must run inside a Tokio runtime.
pub fn init_metrics() -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .map_err(|e| Error::config(format!("failed to install metrics exporter: {e}")))
}

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process. Later calls (tests
/// building several states) reuse the existing handle.
pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    metrics::describe_counter!("store_operations_total", "Store operation attempts by outcome");
    metrics::describe_counter!("store_throttled_total", "Throttled store attempts");
    metrics::describe_histogram!("store_operation_cost_units", "Request charge per operation");
    metrics::describe_histogram!(
        "store_operation_latency_seconds",
        "Latency of a single store attempt"
    );
    metrics::describe_counter!("sweep_runs_total", "Completed expiry sweep ticks");
    metrics::describe_counter!("sweep_finalized_total", "Sessions finalized by the sweep");
    metrics::describe_counter!("evaluation_handoff_total", "Evaluation triggers by outcome");
    metrics::describe_counter!("http_requests_total", "HTTP responses by status");
    metrics::describe_histogram!("http_request_duration_seconds", "HTTP request latency");
}

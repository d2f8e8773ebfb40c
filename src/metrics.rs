//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install a Prometheus exporter serving `/metrics` on `addr`
pub fn setup_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!(addr = %addr, "Prometheus metrics exporter installed");

    Ok(())
}

/// Record the outcome of a single-model command
pub fn record_command(action: &str, success: bool) {
    metrics::counter!("fleet_commands_total",
        "action" => action.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a failed poll fetch
pub fn record_poll_failure(target: &str) {
    metrics::counter!("fleet_poll_failures_total",
        "target" => target.to_string()
    )
    .increment(1);
}

/// Record per-target failures inside a bulk operation
pub fn record_bulk_failures(action: &str, failed: usize) {
    metrics::counter!("fleet_bulk_failures_total",
        "action" => action.to_string()
    )
    .increment(failed as u64);
}

/// Update total model count gauge
pub fn update_model_count(count: usize) {
    metrics::gauge!("fleet_models_count").set(count as f64);
}

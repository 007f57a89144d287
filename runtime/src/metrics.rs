//! Prometheus recorder installation.

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and return its render handle.
///
/// Safe to call once per process; subsequent calls return `None` because a
/// recorder is already installed, which callers treat as "metrics already
/// wired". Metric descriptions are registered on the winning call.
#[must_use]
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            Some(handle)
        },
        Err(err) => {
            tracing::debug!(error = %err, "prometheus recorder not installed");
            None
        },
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Popup Arbiter Metrics
    describe_counter!(
        "cartpilot_popups_dismissed_total",
        "Total number of nuisance overlays dismissed by popup sweeps"
    );
    describe_counter!(
        "cartpilot_popup_clicks_rejected_total",
        "Total number of popup clicks refused by the safety gate"
    );

    // Orchestrator Metrics
    describe_counter!(
        "cartpilot_phase_entered_total",
        "Total number of run phase entries, labelled by phase"
    );

    // Retry Metrics
    describe_counter!(
        "cartpilot_retries_total",
        "Total number of retry attempts across orchestrator operations"
    );
}

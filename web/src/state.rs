//! Shared handler state.

use cartpilot_runtime::SessionService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// The session control plane.
    pub service: Arc<dyn SessionService>,
    /// Prometheus render handle, when the recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build state over a session service.
    #[must_use]
    pub fn new(service: Arc<dyn SessionService>) -> Self {
        Self {
            service,
            metrics: None,
        }
    }

    /// Attach a metrics render handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

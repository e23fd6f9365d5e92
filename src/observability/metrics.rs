//! Prometheus metrics for the broker.
//!
//! Provides metrics for:
//! - Authentication outcomes per flow (federated, local, logout)
//! - Pending-state traffic between the emulated SP and IdP
//! - Errors surfaced to clients
//! - Cache backend operations

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for the metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without the `prometheus` feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the outcome of an authentication flow.
///
/// `flow` is one of `federated`, `local`, `logout`; `outcome` names the
/// transition taken (e.g. `authenticated`, `provisioning`, `rejected`).
pub fn record_auth_outcome(flow: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "auth_outcomes_total",
            "flow" => flow.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (flow, outcome);
    }
}

/// Record a pending-state operation (create, mark, resolve, discard).
pub fn record_pending_state_operation(operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "pending_state_operations_total",
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (operation, result);
    }
}

/// Record an error returned to a client.
pub fn record_auth_error(error_type: &str, error_code: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "auth_errors_total",
            "error_type" => error_type.to_string(),
            "error_code" => error_code.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (error_type, error_code);
    }
}

/// Record cache operation.
pub fn record_cache_operation(cache_type: &str, operation: &str, result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "cache_operations_total",
            "cache_type" => cache_type.to_string(),
            "operation" => operation.to_string(),
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (cache_type, operation, result);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

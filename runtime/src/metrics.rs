//! Prometheus metrics for the cancellation registry.
//!
//! The registry records its own cancel and component metrics; this module
//! adds the request-path and sweep counters. Everything goes through the
//! `metrics` facade, so nothing is exported until a recorder is installed:
//!
//! ```rust,no_run
//! use cancelable_requests_runtime::metrics::install_prometheus;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! if let Some(handle) = install_prometheus()? {
//!     let body = handle.render();
//!     # let _ = body;
//! }
//! # Ok(())
//! # }
//! ```

use cancelable_requests_core::SweepReport;
use metrics::{counter, describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

pub use cancelable_requests_core::metrics::{
    COMPONENTS, HANDLE_FAILURES, HANDLES_INVOKED, TOMBSTONES_UPGRADED,
};

/// Requests installed as `Pending`
pub const REQUESTS_TRACKED: &str = "cancel_registry.requests_tracked";
/// Pending requests cancelled because a newer one replaced them
pub const REQUESTS_SUPERSEDED: &str = "cancel_registry.requests_superseded";
/// Requests that proceeded without cancellation support
pub const REQUESTS_UNCANCELABLE: &str = "cancel_registry.requests_uncancelable";
/// Terminal slots removed by sweeps
pub const TOMBSTONES_SWEPT: &str = "cancel_registry.tombstones_swept";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TRACKED, "Requests tracked by the cancellation registry");
    describe_counter!(
        REQUESTS_SUPERSEDED,
        "Pending requests cancelled by a newer request with the same identity"
    );
    describe_counter!(HANDLES_INVOKED, "Cancel handles invoked");
    describe_counter!(
        HANDLE_FAILURES,
        "Cancel handles that failed or panicked while cancelling"
    );
    describe_counter!(
        TOMBSTONES_UPGRADED,
        "Completed requests marked canceled by a late cancel"
    );
    describe_counter!(
        REQUESTS_UNCANCELABLE,
        "Requests sent without cancellation support after caller misuse"
    );
    describe_counter!(TOMBSTONES_SWEPT, "Removed or canceled slots dropped by sweeps");
    describe_gauge!(COMPONENTS, "Components currently registered");
}

/// Install a Prometheus recorder for the process.
///
/// Returns `Ok(None)` when a recorder is already installed (e.g. by another
/// test); metrics keep flowing to that recorder.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if the recorder cannot be installed for
/// any other reason.
pub fn install_prometheus() -> Result<Option<PrometheusHandle>, MetricsError> {
    describe_metrics();

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            tracing::info!("Prometheus recorder installed");
            Ok(Some(handle))
        }
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("already initialized") {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(None)
            } else {
                Err(MetricsError::Install(err_msg))
            }
        }
    }
}

/// Registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record a request installed as `Pending`.
    pub fn record_tracked() {
        counter!(REQUESTS_TRACKED).increment(1);
    }

    /// Record a request sent uncancellable.
    pub fn record_uncancelable() {
        counter!(REQUESTS_UNCANCELABLE).increment(1);
    }

    /// Record pending requests cancelled by a newer one.
    ///
    /// The handles themselves are counted by the registry.
    pub fn record_superseded(superseded: usize) {
        if superseded > 0 {
            counter!(REQUESTS_SUPERSEDED).increment(superseded as u64);
        }
    }

    /// Record a handle invoked outside the registry.
    pub fn record_direct_cancel(failed: bool) {
        counter!(HANDLES_INVOKED).increment(1);
        if failed {
            counter!(HANDLE_FAILURES).increment(1);
        }
    }

    /// Record the tombstones removed by a sweep.
    pub fn record_sweep(report: &SweepReport) {
        counter!(TOMBSTONES_SWEPT).increment(report.tombstones_removed as u64);
    }
}

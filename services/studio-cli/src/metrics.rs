//! Prometheus recorder for the CLI process
//!
//! Counters are emitted by `studio-client`; the CLI only installs the
//! recorder and, on request, prints the text exposition after a run.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-wide recorder and return a handle for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

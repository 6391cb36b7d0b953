//! In-process Prometheus recorder written out once at exit.
//!
//! A conversion is a one-shot process, so nothing is served. Metrics are
//! collected for the lifetime of the run and flushed as a Prometheus text
//! snapshot, either to a textfile-collector path or to the log.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{
    AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu,
    WriteSnapshotSnafu,
};

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Access to the installed recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

/// Install the process-wide recorder.
///
/// # Errors
///
/// Fails if a recorder is already installed.
pub fn init() -> Result<(), MetricsError> {
    ensure!(CONTROLLER.get().is_none(), AlreadyInitializedSnafu);

    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())?;

    debug!("Metrics recorder installed");
    Ok(())
}

/// Install the recorder from any number of test threads.
#[cfg(test)]
pub(crate) fn init_test() {
    if init().is_err() {
        // Another thread won the race
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

impl MetricsController {
    /// # Errors
    ///
    /// Fails if [`init`] has not been called.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Write the current snapshot to `path`, or log it when no path is given.
///
/// The file is replaced atomically so a collector never reads half of it.
pub fn flush(path: Option<&Path>) -> Result<(), MetricsError> {
    let snapshot = MetricsController::get()?.render();

    let Some(path) = path else {
        info!("Metrics snapshot:\n{}", snapshot);
        return Ok(());
    };

    let staging = path.with_extension("prom.tmp");
    std::fs::write(&staging, &snapshot).context(WriteSnapshotSnafu {
        path: staging.display().to_string(),
    })?;
    std::fs::rename(&staging, path).context(WriteSnapshotSnafu {
        path: path.display().to_string(),
    })?;

    debug!("Wrote metrics snapshot to {}", path.display());
    Ok(())
}

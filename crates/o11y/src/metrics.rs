use std::net::SocketAddr;

use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

use crate::O11yError;

static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Serve `/metrics` here. No recorder is installed when unset.
    pub http_listener: Option<SocketAddr>,
}

impl Config {
    pub fn from_listen(listen: Option<&str>) -> Result<Self, O11yError> {
        let http_listener = listen
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                l.trim()
                    .parse::<SocketAddr>()
                    .map_err(|e| O11yError::Metrics(format!("listen `{l}`: {e}")))
            })
            .transpose()?;
        Ok(Self { http_listener })
    }
}

/// Install the Prometheus recorder with its scrape listener.
///
/// Must run inside a tokio runtime. Without a listener the `metrics`
/// macros stay no-ops.
pub fn init(cfg: &Config) -> Result<(), O11yError> {
    let Some(addr) = cfg.http_listener else {
        return Ok(());
    };
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| O11yError::Metrics(e.to_string()))?;
    INSTALLED.set(()).ok();

    describe_metrics();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

pub fn describe_metrics() {
    describe_counter!(
        "rowsync_runs_total",
        Unit::Count,
        "Sync runs by outcome"
    );
    describe_counter!(
        "rowsync_batches_submitted_total",
        Unit::Count,
        "Load jobs submitted"
    );
    describe_counter!(
        "rowsync_rows_loaded_total",
        Unit::Count,
        "Rows in load jobs that finished successfully"
    );
    describe_counter!(
        "rowsync_load_jobs_total",
        Unit::Count,
        "Finished load jobs by outcome"
    );
    describe_counter!(
        "rowsync_job_polls_total",
        Unit::Count,
        "Status polls issued against load jobs"
    );
    describe_counter!(
        "rowsync_tail_cleanups_total",
        Unit::Count,
        "Tail windows deleted before resuming"
    );
    describe_counter!(
        "rowsync_panics_total",
        Unit::Count,
        "Panics captured by the hook"
    );
    describe_histogram!(
        "rowsync_load_job_seconds",
        Unit::Seconds,
        "Time from submit to terminal state"
    );
    describe_histogram!(
        "rowsync_batch_bytes",
        Unit::Bytes,
        "Distribution of encoded batch sizes"
    );
    describe_histogram!(
        "rowsync_batch_build_seconds",
        Unit::Seconds,
        "Read, transform and encode time per batch"
    );
}

//! Observability for the sync binary: tracing subscriber, Prometheus
//! metrics and a panic hook.

pub mod logging;
pub mod metrics;
pub mod panic;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum O11yError {
    #[error("invalid log filter `{filter}`: {details}")]
    Filter { filter: String, details: String },

    #[error("tracing subscriber: {0}")]
    Subscriber(String),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

/// Logging first, so the later steps can report through it.
pub fn init_all(
    log_cfg: &logging::Config,
    metrics_cfg: &metrics::Config,
) -> Result<(), O11yError> {
    logging::init(log_cfg)?;
    panic::install_hook();
    metrics::init(metrics_cfg)?;
    Ok(())
}

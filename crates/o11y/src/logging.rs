use std::sync::OnceLock;

use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt,
};

use crate::O11yError;

static INIT: OnceLock<Result<(), O11yError>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct Config {
    /// Either a simple level like "info" or a full EnvFilter string
    /// e.g. "info,sinks=debug,mysql_async=warn".
    pub level: Option<String>,
    /// Emit logs as JSON lines when true; otherwise pretty text.
    pub json: bool,
    /// Include the module target in each line.
    pub with_targets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: false,
            with_targets: false,
        }
    }
}

/// Build the filter: `RUST_LOG` wins over the configured level.
pub fn build_filter(level: Option<&str>) -> Result<EnvFilter, O11yError> {
    if let Ok(filter) = EnvFilter::try_from_env("RUST_LOG") {
        return Ok(filter);
    }
    let level = level.filter(|l| !l.trim().is_empty()).unwrap_or("info");
    EnvFilter::try_new(level).map_err(|e| O11yError::Filter {
        filter: level.to_owned(),
        details: e.to_string(),
    })
}

/// Install the global subscriber. Later calls return the first outcome.
pub fn init(cfg: &Config) -> Result<(), O11yError> {
    let outcome = INIT.get_or_init(|| {
        let _ = LogTracer::init();
        let filter = build_filter(cfg.level.as_deref())?;

        let fmt_layer = if cfg.json {
            fmt::layer()
                .with_target(cfg.with_targets)
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .boxed()
        } else {
            fmt::layer()
                .with_target(cfg.with_targets)
                .with_ansi(true)
                .boxed()
        };

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| O11yError::Subscriber(e.to_string()))
    });

    outcome.clone()
}

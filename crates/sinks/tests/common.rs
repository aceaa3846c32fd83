//! Shared test utilities for warehouse tests.

use std::sync::Once;

use bytes::Bytes;
use rowsync_core::BatchRecord;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (once per process).
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,sinks=debug"));

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer().compact())
            .with(filter)
            .try_init();
    });
}

pub fn record(value: serde_json::Value) -> BatchRecord {
    serde_json::from_value(value).expect("object")
}

pub fn ndjson(records: &[BatchRecord]) -> Bytes {
    let mut out = Vec::new();
    for r in records {
        serde_json::to_writer(&mut out, r).expect("encode");
        out.push(b'\n');
    }
    Bytes::from(out)
}

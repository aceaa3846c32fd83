//! Shared fixtures for sync scenario tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use rowsync_core::{
    BatchRecord, CellValue, ColumnDescriptor, ColumnSpec, DestType, SourceRow,
    SourceType,
};
use runner::{Coordinator, CoordinatorBuilder};
use sinks::MemWarehouse;
use sources::MemSource;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests (once per process).
pub fn init_test_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("warn,runner=info"));

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer().compact())
            .with(filter)
            .try_init();
    });
}

pub const TABLE: &str = "orders";

pub fn source_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("id", SourceType::BigInt),
        ColumnDescriptor::new("Day", SourceType::Date),
        ColumnDescriptor::new("name", SourceType::String),
    ]
}

pub fn dest_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec {
            name: "id".into(),
            dest_type: DestType::Integer,
        },
        ColumnSpec {
            name: "day".into(),
            dest_type: DestType::Date,
        },
        ColumnSpec {
            name: "name".into(),
            dest_type: DestType::String,
        },
    ]
}

pub fn source_row(id: i64, day: u8) -> SourceRow {
    vec![
        ("id".to_owned(), CellValue::Int(id)),
        ("Day".to_owned(), CellValue::datetime(2024, 1, day, 0, 0, 0)),
        ("name".to_owned(), CellValue::text(format!("order {id}"))),
    ]
}

pub fn dest_row(id: i64, day: u8) -> BatchRecord {
    let value = serde_json::json!({
        "id": id,
        "day": format!("2024-01-{day:02}"),
        "name": format!("order {id}"),
    });
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Source table with `rows` rows; row `i` falls on day `day_of(i)`.
pub async fn source_with(rows: i64, day_of: impl Fn(i64) -> u8) -> Arc<MemSource> {
    let src = MemSource::new();
    src.create_table(TABLE, source_columns()).await;
    src.append_rows(TABLE, (1..=rows).map(|i| source_row(i, day_of(i))).collect())
        .await;
    Arc::new(src)
}

/// Destination table seeded with `rows`.
pub async fn warehouse_with(wh: MemWarehouse, rows: Vec<BatchRecord>) -> Arc<MemWarehouse> {
    wh.seed_table(TABLE, dest_columns(), rows).await;
    Arc::new(wh)
}

pub fn fast(src: Arc<MemSource>, wh: Arc<MemWarehouse>) -> CoordinatorBuilder {
    Coordinator::builder(src, wh)
        .poll_interval(Duration::from_millis(1))
        .max_poll_duration(Duration::from_secs(10))
}

//! Warehouse contract exercised through the trait object the engine uses.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use rowsync_core::{
    ArcDynWarehouse, ColumnSpec, DestType, JobState, Warehouse, Watermark,
};
use serde_json::json;
use sinks::MemWarehouse;
use crate::common::{init_test_tracing, ndjson, record};

fn columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec {
            name: "id".into(),
            dest_type: DestType::Integer,
        },
        ColumnSpec {
            name: "day".into(),
            dest_type: DestType::Date,
        },
    ]
}

async fn wait(wh: &ArcDynWarehouse, job: &rowsync_core::JobHandle) -> JobState {
    loop {
        let status = wh.poll_job(job).await.expect("poll");
        if status.state.is_terminal() {
            return status.state;
        }
    }
}

#[tokio::test]
async fn tail_rows_are_replaced_not_duplicated() {
    init_test_tracing();
    let mem = Arc::new(MemWarehouse::new().with_polls_to_complete(3));
    let wh: ArcDynWarehouse = mem.clone();

    wh.create_table("events", &columns()).await.unwrap();
    let first = wh
        .submit_load(
            "events",
            ndjson(&[
                record(json!({"id": 1, "day": "2024-01-04"})),
                record(json!({"id": 2, "day": "2024-01-05"})),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(wait(&wh, &first).await, JobState::Succeeded);

    let max = wh.max_value("events", "day").await.unwrap();
    assert_eq!(max, Some(Watermark::new("2024-01-05")));

    // reload the tail day together with newer rows
    wh.delete_where("events", "day", max.as_ref().unwrap())
        .await
        .unwrap();
    let second = wh
        .submit_load(
            "events",
            ndjson(&[
                record(json!({"id": 2, "day": "2024-01-05"})),
                record(json!({"id": 3, "day": "2024-01-05"})),
                record(json!({"id": 4, "day": "2024-01-06"})),
            ]),
        )
        .await
        .unwrap();
    assert_eq!(wait(&wh, &second).await, JobState::Succeeded);

    assert_eq!(wh.count_rows("events").await.unwrap(), Some(4));
    assert_eq!(mem.max_in_flight().await, 1);
    assert_eq!(mem.columns("events").await, Some(columns()));
}

#[tokio::test]
async fn load_into_missing_table_is_rejected() {
    init_test_tracing();
    let wh = MemWarehouse::new();
    let err = wh
        .submit_load("nope", ndjson(&[record(json!({"id": 1}))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not found");
    assert!(!wh.table_exists("nope").await.unwrap());
}

#[tokio::test]
async fn rejected_create_surfaces_reason() {
    let wh = MemWarehouse::new().with_rejected_create("invalid field name");
    let err = wh.create_table("t", &columns()).await.unwrap_err();
    assert!(err.to_string().contains("invalid field name"));
}

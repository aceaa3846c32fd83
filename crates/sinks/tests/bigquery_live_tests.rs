//! Runs against a real BigQuery dataset (or an emulator) when
//! `ROWSYNC_TEST_BQ_PROJECT`, `ROWSYNC_TEST_BQ_DATASET` and
//! either `ROWSYNC_TEST_BQ_TOKEN` or `ROWSYNC_TEST_BQ_KEY_FILE` are set.
//! `ROWSYNC_TEST_BQ_ENDPOINT` points the client at an emulator.
//!
//! cargo test -p sinks --test bigquery_live_tests -- --ignored --nocapture

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use rowsync_config::WarehouseCfg;
use rowsync_core::{ColumnSpec, DestType, JobState, Warehouse, Watermark};
use serde_json::json;
use sinks::BigQueryWarehouse;
use crate::common::{init_test_tracing, ndjson, record};
use tokio_util::sync::CancellationToken;

fn cfg() -> Option<WarehouseCfg> {
    let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
    Some(WarehouseCfg {
        project_id: var("ROWSYNC_TEST_BQ_PROJECT")?,
        dataset: var("ROWSYNC_TEST_BQ_DATASET")?,
        access_token: var("ROWSYNC_TEST_BQ_TOKEN"),
        key_file: var("ROWSYNC_TEST_BQ_KEY_FILE"),
        location: var("ROWSYNC_TEST_BQ_LOCATION"),
        endpoint: var("ROWSYNC_TEST_BQ_ENDPOINT"),
    })
}

#[tokio::test]
#[ignore = "needs ROWSYNC_TEST_BQ_* credentials"]
async fn bigquery_table_load_and_tail_cleanup() {
    init_test_tracing();
    let Some(cfg) = cfg() else {
        eprintln!("ROWSYNC_TEST_BQ_* not set, skipping");
        return;
    };
    let wh = BigQueryWarehouse::new(&cfg, CancellationToken::new()).unwrap();
    let table = "rowsync_live_test";

    wh.delete_table(table).await.unwrap();
    assert!(!wh.table_exists(table).await.unwrap());

    wh.create_table(
        table,
        &[
            ColumnSpec {
                name: "id".into(),
                dest_type: DestType::Integer,
            },
            ColumnSpec {
                name: "day".into(),
                dest_type: DestType::Date,
            },
        ],
    )
    .await
    .unwrap();

    let job = wh
        .submit_load(
            table,
            ndjson(&[
                record(json!({"id": 1, "day": "2024-01-05"})),
                record(json!({"id": 2, "day": "2024-01-06"})),
            ]),
        )
        .await
        .unwrap();

    let mut state = JobState::Pending;
    for _ in 0..120 {
        let status = wh.poll_job(&job).await.unwrap();
        assert!(status.errors.is_empty(), "load failed: {:?}", status.errors);
        state = status.state;
        if state.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert_eq!(state, JobState::Succeeded);

    assert_eq!(
        wh.max_value(table, "day").await.unwrap(),
        Some(Watermark::new("2024-01-06"))
    );
    wh.delete_where(table, "day", &Watermark::new("2024-01-06"))
        .await
        .unwrap();
    assert_eq!(
        wh.max_value(table, "day").await.unwrap(),
        Some(Watermark::new("2024-01-05"))
    );

    wh.delete_table(table).await.unwrap();
}

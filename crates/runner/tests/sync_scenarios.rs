//! End-to-end sync runs against the in-memory source and warehouse.

mod common;

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use rowsync_core::{SyncError, Watermark};
use runner::{SyncOutcome, SyncProgress, SyncRequest};
use sinks::MemWarehouse;
use crate::common::{
    TABLE, dest_row, fast, init_test_tracing, source_with, warehouse_with,
};

fn row_count(batch_size: usize) -> SyncRequest {
    SyncRequest {
        batch_size,
        ..SyncRequest::new(TABLE)
    }
}

fn by_day(batch_size: usize) -> SyncRequest {
    SyncRequest {
        order_column: Some("Day".into()),
        batch_size,
        ..SyncRequest::new(TABLE)
    }
}

#[tokio::test]
async fn missing_table_without_create_fails() {
    init_test_tracing();
    let src = source_with(3, |_| 1).await;
    let wh = Arc::new(MemWarehouse::new());
    let coord = fast(src, wh.clone()).build();

    match coord.sync(&row_count(10)).await.unwrap_err() {
        SyncError::TableNotFound { table } => assert_eq!(table, TABLE),
        other => panic!("expected TableNotFound, got {other:?}"),
    }
    assert!(wh.submitted().await.is_empty());
}

#[tokio::test]
async fn row_count_delta_in_fixed_batches() {
    init_test_tracing();
    let src = source_with(250_000, |i| (i % 28 + 1) as u8).await;
    let wh = warehouse_with(MemWarehouse::new(), Vec::new()).await;
    let coord = fast(src.clone(), wh.clone()).build();

    let report = coord.sync(&row_count(20_000)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::Synced);
    assert_eq!(report.rows_planned, 250_000);
    assert_eq!(report.rows_loaded, 250_000);
    assert_eq!(report.batches_planned, 13);
    assert_eq!(report.batches_submitted, 13);

    let sizes: Vec<usize> = wh.submitted().await.iter().map(|s| s.rows).collect();
    let mut expected = vec![20_000; 12];
    expected.push(10_000);
    assert_eq!(sizes, expected);

    let offsets: Vec<u64> = src.queries().await.iter().map(|q| q.offset).collect();
    assert_eq!(offsets, (0..13).map(|i| i * 20_000).collect::<Vec<_>>());
    assert_eq!(wh.rows(TABLE).await.len(), 250_000);
}

#[tokio::test]
async fn row_count_starts_after_loaded_rows() {
    init_test_tracing();
    let src = source_with(25, |_| 1).await;
    let wh = warehouse_with(
        MemWarehouse::new(),
        (1..=10).map(|i| dest_row(i, 1)).collect(),
    )
    .await;
    let coord = fast(src.clone(), wh.clone()).build();

    let report = coord.sync(&row_count(10)).await.unwrap();

    assert_eq!(report.rows_loaded, 15);
    let windows: Vec<(u64, u64)> = src
        .queries()
        .await
        .iter()
        .map(|q| (q.offset, q.limit))
        .collect();
    assert_eq!(windows, vec![(10, 10), (20, 5)]);
    assert_eq!(wh.rows(TABLE).await.len(), 25);
}

#[tokio::test]
async fn equal_watermarks_do_nothing() {
    init_test_tracing();
    let src = source_with(5, |i| i as u8).await;
    let wh = warehouse_with(
        MemWarehouse::new(),
        (1..=5).map(|i| dest_row(i, i as u8)).collect(),
    )
    .await;
    let coord = fast(src.clone(), wh.clone()).build();

    let report = coord.sync(&by_day(10)).await.unwrap();

    assert_eq!(report.outcome, SyncOutcome::AlreadySynced);
    assert_eq!(report.rows_planned, 0);
    assert!(wh.submitted().await.is_empty());
    assert!(wh.deletes().await.is_empty());
    assert!(src.queries().await.is_empty());
}

#[tokio::test]
async fn tail_rows_are_replaced() {
    init_test_tracing();
    // Days 1..=5 with two rows each, then two rows on day 6.
    let src = source_with(12, |i| ((i - 1) / 2 + 1) as u8).await;
    // Warehouse stopped half way through day 5.
    let wh = warehouse_with(
        MemWarehouse::new(),
        (1..=9).map(|i| dest_row(i, ((i - 1) / 2 + 1) as u8)).collect(),
    )
    .await;
    let coord = fast(src.clone(), wh.clone()).build();

    let report = coord.sync(&by_day(3)).await.unwrap();

    assert_eq!(report.cleaned_value, Some(Watermark::new("2024-01-05")));
    assert_eq!(report.rows_planned, 4);
    assert_eq!(report.rows_loaded, 4);
    assert_eq!(report.batches_submitted, 2);

    let deletes = wh.deletes().await;
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].column, "day");
    assert_eq!(deletes[0].value, Watermark::new("2024-01-05"));

    for q in src.queries().await {
        assert_eq!(q.order_by.as_deref(), Some("Day"));
        assert_eq!(q.after, Some(Watermark::new("2024-01-04")));
    }

    let mut ids: Vec<i64> = wh
        .rows(TABLE)
        .await
        .iter()
        .filter_map(|r| r.get("id").and_then(|v| v.as_i64()))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=12).collect::<Vec<_>>());
}

#[tokio::test]
async fn empty_warehouse_loads_everything_in_order() {
    init_test_tracing();
    let src = source_with(6, |i| (7 - i) as u8).await;
    let wh = warehouse_with(MemWarehouse::new(), Vec::new()).await;
    let coord = fast(src.clone(), wh.clone()).build();

    let report = coord.sync(&by_day(4)).await.unwrap();

    assert_eq!(report.cleaned_value, None);
    assert_eq!(report.rows_loaded, 6);
    assert!(wh.deletes().await.is_empty());

    let days: Vec<String> = wh
        .rows(TABLE)
        .await
        .iter()
        .filter_map(|r| r.get("day").and_then(|v| v.as_str()).map(str::to_owned))
        .collect();
    let mut sorted = days.clone();
    sorted.sort();
    assert_eq!(days, sorted);
}

#[tokio::test]
async fn unknown_field_aborts_before_submit() {
    init_test_tracing();
    let src = source_with(2, |_| 1).await;
    let mut extra = common::source_row(3, 1);
    extra.push(("discount".to_owned(), rowsync_core::CellValue::Int(5)));
    src.append_rows(TABLE, vec![extra]).await;

    let wh = warehouse_with(MemWarehouse::new(), Vec::new()).await;
    let coord = fast(src, wh.clone()).build();

    match coord.sync(&row_count(10)).await.unwrap_err() {
        SyncError::SchemaMismatch { column } => assert_eq!(column, "discount"),
        other => panic!("expected SchemaMismatch, got {other:?}"),
    }
    assert!(wh.submitted().await.is_empty());
}

#[tokio::test]
async fn at_most_one_job_in_flight() {
    init_test_tracing();
    let src = source_with(50, |_| 1).await;
    let wh = warehouse_with(MemWarehouse::new().with_polls_to_complete(3), Vec::new()).await;
    let coord = fast(src, wh.clone()).build();

    let report = coord.sync(&row_count(10)).await.unwrap();

    assert_eq!(report.batches_submitted, 5);
    assert_eq!(wh.max_in_flight().await, 1);
    assert_eq!(wh.in_flight().await, 0);
    assert!(wh.submitted().await.iter().all(|s| s.in_flight_before == 0));
    assert_eq!(wh.total_polls().await, 15);
}

#[tokio::test]
async fn failed_job_stops_run_and_rerun_resumes() {
    init_test_tracing();
    let src = source_with(5, |_| 1).await;
    let wh = warehouse_with(
        MemWarehouse::new().with_failing_load(1, vec!["invalid row".into()]),
        Vec::new(),
    )
    .await;
    let coord = fast(src.clone(), wh.clone()).build();

    match coord.sync(&row_count(2)).await.unwrap_err() {
        SyncError::LoadJob { job_id, errors } => {
            assert_eq!(job_id, "mem_job_2");
            assert_eq!(errors, vec!["invalid row".to_string()]);
        }
        other => panic!("expected LoadJob, got {other:?}"),
    }
    assert_eq!(wh.submitted().await.len(), 2);
    assert_eq!(wh.rows(TABLE).await.len(), 2);

    let report = coord.sync(&row_count(2)).await.unwrap();
    assert_eq!(report.rows_planned, 3);
    assert_eq!(wh.rows(TABLE).await.len(), 5);
}

#[tokio::test]
async fn force_recreate_reloads_from_scratch() {
    init_test_tracing();
    let src = source_with(3, |_| 2).await;
    let wh = warehouse_with(
        MemWarehouse::new(),
        (1..=7).map(|i| dest_row(i, 1)).collect(),
    )
    .await;
    let coord = fast(src, wh.clone()).build();

    let req = SyncRequest {
        force_recreate: true,
        ..row_count(10)
    };
    let report = coord.sync(&req).await.unwrap();

    assert!(report.created_table);
    assert_eq!(wh.dropped_tables().await, vec![TABLE.to_string()]);
    assert_eq!(wh.rows(TABLE).await.len(), 3);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    init_test_tracing();
    let src = source_with(7, |i| i as u8).await;
    let wh = warehouse_with(MemWarehouse::new(), Vec::new()).await;
    let coord = fast(src, wh.clone()).build();

    for req in [row_count(3), by_day(3)] {
        coord.sync(&req).await.unwrap();
        let again = coord.sync(&req).await.unwrap();
        assert_eq!(again.outcome, SyncOutcome::AlreadySynced);
    }
    assert_eq!(wh.rows(TABLE).await.len(), 7);
}

#[tokio::test]
async fn progress_events_cover_the_run() {
    init_test_tracing();
    let src = source_with(5, |_| 1).await;
    let wh = warehouse_with(MemWarehouse::new(), Vec::new()).await;
    let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let coord = fast(src, wh)
        .on_progress(Box::new(move |e: SyncProgress| {
            if let Ok(mut v) = sink.lock() {
                v.push(e);
            }
        }))
        .build();

    coord.sync(&row_count(2)).await.unwrap();

    let events = events.lock().unwrap().clone();
    assert!(matches!(events.first(), Some(SyncProgress::Planning { .. })));
    assert_eq!(
        events.last(),
        Some(&SyncProgress::Done {
            rows_loaded: 5,
            batches: 3
        })
    );
    let submitted = events
        .iter()
        .filter(|e| matches!(e, SyncProgress::BatchSubmitted { total: 3, .. }))
        .count();
    assert_eq!(submitted, 3);
    assert!(events.iter().any(|e| matches!(
        e,
        SyncProgress::Verified {
            expected_rows: 5,
            warehouse_rows: Some(5)
        }
    )));
}

/// Four clean rows, then one carrying a column the catalog does not know.
async fn source_with_bad_fifth_row() -> Arc<sources::MemSource> {
    let src = source_with(4, |_| 1).await;
    let mut extra = common::source_row(5, 1);
    extra.push(("discount".to_owned(), rowsync_core::CellValue::Int(5)));
    src.append_rows(TABLE, vec![extra]).await;
    src
}

#[tokio::test]
async fn batch_error_waits_for_running_job() {
    init_test_tracing();
    let src = source_with_bad_fifth_row().await;
    let wh = warehouse_with(MemWarehouse::new().with_polls_to_complete(2), Vec::new()).await;
    let coord = fast(src, wh.clone()).build();

    // Batch 3 fails to transform while job 2 is still running.
    let err = coord.sync(&row_count(2)).await.unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { .. }), "{err:?}");
    assert_eq!(wh.submitted().await.len(), 2);
    assert_eq!(wh.in_flight().await, 0);
    assert_eq!(wh.rows(TABLE).await.len(), 4);
}

#[tokio::test]
async fn running_job_failure_wins_over_later_batch_error() {
    init_test_tracing();
    let src = source_with_bad_fifth_row().await;
    let wh = warehouse_with(
        MemWarehouse::new().with_failing_load(1, vec!["quota exceeded".into()]),
        Vec::new(),
    )
    .await;
    let coord = fast(src, wh.clone()).build();

    match coord.sync(&row_count(2)).await.unwrap_err() {
        SyncError::LoadJob { job_id, errors } => {
            assert_eq!(job_id, "mem_job_2");
            assert_eq!(errors, vec!["quota exceeded".to_string()]);
        }
        other => panic!("expected LoadJob, got {other:?}"),
    }
    assert_eq!(wh.in_flight().await, 0);
    assert_eq!(wh.rows(TABLE).await.len(), 2);
}

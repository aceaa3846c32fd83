//! Progress events emitted by the sync engine.
//!
//! The engine never prints. Callers that want feedback pass a
//! [`ProgressCallback`]; the CLI routes events to tracing.

use std::time::Duration;

use rowsync_core::{JobState, Watermark};

use crate::planner::PlanMode;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncProgress {
    /// Comparing source and destination.
    Planning { table: String, mode: PlanMode },

    /// The delta has been computed.
    Planned {
        rows_to_sync: u64,
        batches: usize,
        watermark: Option<Watermark>,
    },

    /// Nothing to transfer.
    AlreadySynced { table: String },

    DroppingTable { table: String },

    CreatingTable { table: String, columns: usize },

    /// Deleting destination rows at the tail watermark.
    CleaningTail { column: String, value: Watermark },

    /// Tail removed; `watermark` is the confirmed maximum to resume after.
    TailCleaned {
        column: String,
        watermark: Option<Watermark>,
    },

    /// One batch was handed to the warehouse. `index` is 1-based.
    BatchSubmitted {
        index: usize,
        total: usize,
        rows: usize,
        job_id: String,
    },

    /// Batch window came back empty from the source and was skipped.
    BatchSkipped { index: usize, total: usize },

    /// A load job was polled and is not finished yet.
    PollTick {
        job_id: String,
        state: JobState,
        waited: Duration,
    },

    JobFinished {
        job_id: String,
        rows: usize,
        elapsed: Duration,
    },

    /// Row-count check after the last load (row-count mode only).
    Verified {
        expected_rows: u64,
        warehouse_rows: Option<u64>,
    },

    Done { rows_loaded: u64, batches: usize },
}

/// Callback invoked for each progress event.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Invoke the callback if one was supplied.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

/// Route events to tracing. Used by the CLI.
pub fn log_progress(event: SyncProgress) {
    match event {
        SyncProgress::Planning { table, mode } => {
            tracing::info!(table = %table, mode = %mode, "planning sync");
        }
        SyncProgress::Planned {
            rows_to_sync,
            batches,
            watermark,
        } => {
            tracing::info!(
                rows_to_sync,
                batches,
                watermark = ?watermark.as_ref().map(Watermark::as_str),
                "sync planned"
            );
        }
        SyncProgress::AlreadySynced { table } => {
            tracing::info!(table = %table, "already synced");
        }
        SyncProgress::DroppingTable { table } => {
            tracing::info!(table = %table, "deleting destination table");
        }
        SyncProgress::CreatingTable { table, columns } => {
            tracing::info!(table = %table, columns, "creating destination table");
        }
        SyncProgress::CleaningTail { column, value } => {
            tracing::info!(column = %column, value = %value, "cleaning up last window");
        }
        SyncProgress::TailCleaned { column, watermark } => {
            tracing::info!(
                column = %column,
                watermark = ?watermark.as_ref().map(Watermark::as_str),
                "tail cleaned, resuming"
            );
        }
        SyncProgress::BatchSubmitted {
            index,
            total,
            rows,
            job_id,
        } => {
            tracing::info!(batch = index, total, rows, job_id = %job_id, "batch submitted");
        }
        SyncProgress::BatchSkipped { index, total } => {
            tracing::warn!(batch = index, total, "source window was empty, skipped");
        }
        SyncProgress::PollTick {
            job_id,
            state,
            waited,
        } => {
            tracing::debug!(
                job_id = %job_id,
                state = state.as_str(),
                waited_ms = waited.as_millis() as u64,
                "waiting for load job"
            );
        }
        SyncProgress::JobFinished {
            job_id,
            rows,
            elapsed,
        } => {
            tracing::info!(
                job_id = %job_id,
                rows,
                elapsed_ms = elapsed.as_millis() as u64,
                "load job finished"
            );
        }
        SyncProgress::Verified {
            expected_rows,
            warehouse_rows,
        } => {
            tracing::debug!(expected_rows, warehouse_rows = ?warehouse_rows, "row count verified");
        }
        SyncProgress::Done {
            rows_loaded,
            batches,
        } => {
            tracing::info!(rows_loaded, batches, "rows synced");
        }
    }
}

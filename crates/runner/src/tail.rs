//! Tail compensation for watermark syncs.
//!
//! The warehouse has no primary key, so a load that was cut short or
//! retried by an earlier run can leave the rows at the highest watermark
//! incomplete or duplicated. Before resuming, every row at that value is
//! deleted, and the new maximum (all of whose rows are complete) becomes
//! the exclusive lower bound for the next read.

use metrics::counter;
use rowsync_core::{SyncResult, Warehouse, Watermark};
use tracing::info;

pub struct TailCompensation<'a> {
    warehouse: &'a dyn Warehouse,
    table: &'a str,
    column: String,
}

impl<'a> TailCompensation<'a> {
    /// `column` is the destination column, lowercased here.
    pub fn new(warehouse: &'a dyn Warehouse, table: &'a str, column: &str) -> Self {
        Self {
            warehouse,
            table,
            column: column.to_lowercase(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Delete the rows at `tail` and return the confirmed watermark.
    pub async fn apply(&self, tail: &Watermark) -> SyncResult<Option<Watermark>> {
        self.warehouse
            .delete_where(self.table, &self.column, tail)
            .await?;
        counter!("rowsync_tail_cleanups_total", "table" => self.table.to_owned())
            .increment(1);

        let confirmed = self.warehouse.max_value(self.table, &self.column).await?;
        info!(
            table = self.table,
            column = %self.column,
            removed = %tail,
            resume_after = ?confirmed.as_ref().map(Watermark::as_str),
            "tail compensation applied"
        );
        Ok(confirmed)
    }
}

//! Delta planning.
//!
//! Two strategies, picked by whether an ordering column is configured:
//!
//! - **Row count**: `source rows - warehouse rows` read in the source's
//!   natural scan order, starting after the rows already loaded. Only
//!   correct while the source grows append-only and scans in a stable
//!   order.
//! - **Watermark**: rows with `order_column > MAX(order_column)` in the
//!   warehouse, read in ascending order. When the warehouse already holds
//!   rows, the ones at its maximum are treated as possibly incomplete and
//!   are deleted and reloaded (see [`TailCompensation`]).
//!
//! [`TailCompensation`]: crate::tail::TailCompensation

use std::fmt;

use rowsync_core::{
    ArcDynSource, ArcDynWarehouse, RowFilter, RowQuery, SyncError, SyncResult,
    Watermark,
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanMode {
    RowCount,
    Watermark { column: String },
}

impl PlanMode {
    pub fn from_order_column(column: Option<&str>) -> Self {
        match column.map(str::trim).filter(|c| !c.is_empty()) {
            Some(c) => PlanMode::Watermark {
                column: c.to_owned(),
            },
            None => PlanMode::RowCount,
        }
    }

    pub fn order_column(&self) -> Option<&str> {
        match self {
            PlanMode::RowCount => None,
            PlanMode::Watermark { column } => Some(column),
        }
    }
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanMode::RowCount => f.write_str("row-count"),
            PlanMode::Watermark { column } => write!(f, "watermark({column})"),
        }
    }
}

/// One window of source rows, loaded as one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub mode: PlanMode,
    pub needs_create: bool,
    /// Warehouse value whose rows must be deleted before loading.
    pub cleanup: Option<Watermark>,
    /// Lower bound (exclusive) for watermark reads.
    pub watermark: Option<Watermark>,
    /// Warehouse rows at planning time (row-count mode).
    pub dest_rows: u64,
    pub rows_to_sync: u64,
    pub batch_size: u64,
    pub batches: Vec<BatchWindow>,
}

impl SyncPlan {
    fn new(mode: PlanMode, batch_size: u64) -> Self {
        Self {
            mode,
            needs_create: false,
            cleanup: None,
            watermark: None,
            dest_rows: 0,
            rows_to_sync: 0,
            batch_size,
            batches: Vec::new(),
        }
    }

    /// Nothing to load and nothing to clean up.
    pub fn is_empty(&self) -> bool {
        self.rows_to_sync == 0 && self.cleanup.is_none()
    }

    /// Source query for one window of this plan.
    pub fn query(&self, window: BatchWindow) -> RowQuery {
        let q = RowQuery::window(window.offset, window.limit);
        match &self.mode {
            PlanMode::RowCount => q,
            PlanMode::Watermark { column } => {
                q.ordered_by(column.clone()).after(self.watermark.clone())
            }
        }
    }
}

/// `ceil(rows / batch_size)` windows starting at `base_offset`. The last
/// window only covers the remainder, so the limits sum to `rows`.
pub fn plan_batches(rows: u64, batch_size: u64, base_offset: u64) -> Vec<BatchWindow> {
    if rows == 0 || batch_size == 0 {
        return Vec::new();
    }

    let count = rows.div_ceil(batch_size);
    (0..count)
        .map(|i| {
            let start = i * batch_size;
            BatchWindow {
                offset: base_offset + start,
                limit: batch_size.min(rows - start),
            }
        })
        .collect()
}

pub struct DeltaPlanner<'a> {
    source: &'a ArcDynSource,
    warehouse: &'a ArcDynWarehouse,
    source_table: &'a str,
    dest_table: &'a str,
    mode: PlanMode,
    batch_size: u64,
    create_if_missing: bool,
}

impl<'a> DeltaPlanner<'a> {
    pub fn new(
        source: &'a ArcDynSource,
        warehouse: &'a ArcDynWarehouse,
        source_table: &'a str,
        dest_table: &'a str,
        mode: PlanMode,
        batch_size: usize,
        create_if_missing: bool,
    ) -> Self {
        Self {
            source,
            warehouse,
            source_table,
            dest_table,
            mode,
            batch_size: batch_size.max(1) as u64,
            create_if_missing,
        }
    }

    /// Compute the plan. In watermark mode with a pending cleanup the
    /// row count and batches are filled in later by [`Self::resume`].
    pub async fn plan(&self) -> SyncResult<SyncPlan> {
        let mut plan = SyncPlan::new(self.mode.clone(), self.batch_size);
        let exists = self.warehouse.table_exists(self.dest_table).await?;

        if !exists {
            if !self.create_if_missing {
                return Err(SyncError::TableNotFound {
                    table: self.dest_table.to_owned(),
                });
            }
            plan.needs_create = true;
        }

        match &self.mode {
            PlanMode::RowCount => self.plan_row_count(&mut plan, exists).await?,
            PlanMode::Watermark { column } => {
                self.plan_watermark(&mut plan, column, exists).await?
            }
        }
        Ok(plan)
    }

    async fn plan_row_count(&self, plan: &mut SyncPlan, exists: bool) -> SyncResult<()> {
        let source_rows = self.source.count_rows(self.source_table, None).await?;
        let dest_rows = if exists {
            self.warehouse
                .count_rows(self.dest_table)
                .await?
                .unwrap_or(0)
        } else {
            0
        };

        if dest_rows > source_rows {
            // accepted simplification: treated as synced, not an error
            warn!(
                source_rows,
                dest_rows,
                table = self.dest_table,
                "warehouse holds more rows than the source"
            );
        }

        plan.dest_rows = dest_rows;
        plan.rows_to_sync = source_rows.saturating_sub(dest_rows);
        plan.batches = plan_batches(plan.rows_to_sync, plan.batch_size, dest_rows);

        debug!(source_rows, dest_rows, rows = plan.rows_to_sync, "row-count delta");
        Ok(())
    }

    async fn plan_watermark(
        &self,
        plan: &mut SyncPlan,
        column: &str,
        exists: bool,
    ) -> SyncResult<()> {
        let source_type = self
            .source
            .list_columns(self.source_table)
            .await?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .map(|c| c.source_type)
            .ok_or_else(|| SyncError::SchemaMismatch {
                column: column.to_owned(),
            })?;

        let source_max = Watermark::from_cell(
            source_type,
            self.source.max_value(self.source_table, column).await?,
        );
        let dest_max = if exists {
            self.warehouse
                .max_value(self.dest_table, &column.to_lowercase())
                .await?
        } else {
            None
        };

        info!(
            column,
            source_max = ?source_max.as_ref().map(Watermark::as_str),
            dest_max = ?dest_max.as_ref().map(Watermark::as_str),
            "watermarks"
        );

        if source_max == dest_max {
            return Ok(());
        }
        if source_max.is_none() {
            warn!(table = self.source_table, "source is empty, nothing to load");
            return Ok(());
        }

        match dest_max {
            Some(tail) => plan.cleanup = Some(tail),
            None => self.resume(plan, None).await?,
        }
        Ok(())
    }

    /// Count and window the rows after `watermark` (all rows when `None`).
    pub async fn resume(
        &self,
        plan: &mut SyncPlan,
        watermark: Option<Watermark>,
    ) -> SyncResult<()> {
        let Some(column) = plan.mode.order_column() else {
            return Ok(());
        };

        let filter = watermark
            .as_ref()
            .map(|wm| RowFilter::after(column, wm.clone()));
        let rows = self
            .source
            .count_rows(self.source_table, filter.as_ref())
            .await?;

        plan.watermark = watermark;
        plan.rows_to_sync = rows;
        plan.batches = plan_batches(rows, plan.batch_size, 0);

        debug!(
            column,
            watermark = ?plan.watermark.as_ref().map(Watermark::as_str),
            rows,
            "watermark delta"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn batches_cover_rows_exactly() {
        let windows = plan_batches(250_000, 20_000, 0);
        assert_eq!(windows.len(), 13);
        assert_eq!(windows.iter().map(|w| w.limit).sum::<u64>(), 250_000);
        assert_eq!(windows[12], BatchWindow { offset: 240_000, limit: 10_000 });
        assert!(windows[..12].iter().all(|w| w.limit == 20_000));
    }

    #[test]
    fn batch_coverage_over_many_shapes() {
        for rows in [1u64, 7, 19_999, 20_000, 20_001, 99_999] {
            for size in [1u64, 3, 1_000, 20_000] {
                let windows = plan_batches(rows, size, 5);
                assert_eq!(windows.len() as u64, rows.div_ceil(size));
                assert_eq!(windows.iter().map(|w| w.limit).sum::<u64>(), rows);
                assert_eq!(windows[0].offset, 5);
            }
        }
    }

    #[test]
    fn no_rows_no_batches() {
        assert!(plan_batches(0, 100, 0).is_empty());
    }

    #[test]
    fn row_count_offsets_start_after_loaded_rows() {
        let windows = plan_batches(30, 20, 1_000);
        assert_eq!(
            windows,
            vec![
                BatchWindow { offset: 1_000, limit: 20 },
                BatchWindow { offset: 1_020, limit: 10 },
            ]
        );
    }

    #[test]
    fn watermark_query_is_ordered_and_filtered() {
        let mut plan = SyncPlan::new(
            PlanMode::Watermark {
                column: "day".into(),
            },
            10,
        );
        plan.watermark = Some(Watermark::new("2024-01-04"));
        let q = plan.query(BatchWindow { offset: 10, limit: 10 });
        assert_eq!(q.order_by.as_deref(), Some("day"));
        assert_eq!(q.after, Some(Watermark::new("2024-01-04")));
        assert_eq!((q.offset, q.limit), (10, 10));

        let plan = SyncPlan::new(PlanMode::RowCount, 10);
        assert_eq!(
            plan.query(BatchWindow { offset: 3, limit: 4 }),
            RowQuery::window(3, 4)
        );
    }

    #[test]
    fn mode_from_order_column() {
        assert_eq!(PlanMode::from_order_column(None), PlanMode::RowCount);
        assert_eq!(PlanMode::from_order_column(Some("  ")), PlanMode::RowCount);
        assert_eq!(
            PlanMode::from_order_column(Some("created_at")).to_string(),
            "watermark(created_at)"
        );
    }
}

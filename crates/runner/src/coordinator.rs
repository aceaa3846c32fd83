//! Sync orchestration: plan, create, clean up, batch, verify.

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rowsync_core::{
    ArcDynSource, ArcDynWarehouse, BatchEncoder, IgnoreList, SchemaCatalog,
    SyncError, SyncResult, WarehouseError, Watermark, transform_row,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::job_monitor::{InFlight, LoadJobMonitor, MonitorConfig, SubmittedJob};
use crate::planner::{DeltaPlanner, PlanMode, SyncPlan};
use crate::progress::{ProgressCallback, SyncProgress, emit};
use crate::tail::TailCompensation;

/// One sync invocation.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source_table: String,
    pub dest_table: String,
    pub create_if_missing: bool,
    /// Delete and recreate the destination table first.
    pub force_recreate: bool,
    pub order_column: Option<String>,
    pub ignore_columns: IgnoreList,
    pub batch_size: usize,
}

impl SyncRequest {
    /// Same table name on both sides, default batch size, row-count mode.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            dest_table: table.clone(),
            source_table: table,
            create_if_missing: false,
            force_recreate: false,
            order_column: None,
            ignore_columns: IgnoreList::default(),
            batch_size: rowsync_config::DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadySynced,
    Synced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub rows_planned: u64,
    pub rows_loaded: u64,
    pub batches_planned: usize,
    pub batches_submitted: usize,
    /// Tail value deleted before loading, if any.
    pub cleaned_value: Option<Watermark>,
    pub created_table: bool,
    pub elapsed: Duration,
}

/// Run states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Start,
    Planning,
    CreatingTable,
    CleaningUp,
    Batching(usize),
    Verifying,
    Done,
    Failed,
}

pub struct Coordinator {
    source: ArcDynSource,
    warehouse: ArcDynWarehouse,
    monitor_cfg: MonitorConfig,
    cancel: CancellationToken,
    on_progress: Option<ProgressCallback>,
}

pub struct CoordinatorBuilder {
    source: ArcDynSource,
    warehouse: ArcDynWarehouse,
    monitor_cfg: MonitorConfig,
    cancel: Option<CancellationToken>,
    on_progress: Option<ProgressCallback>,
}

impl CoordinatorBuilder {
    pub fn new(source: ArcDynSource, warehouse: ArcDynWarehouse) -> Self {
        Self {
            source,
            warehouse,
            monitor_cfg: MonitorConfig::default(),
            cancel: None,
            on_progress: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.monitor_cfg.poll_interval = interval;
        self
    }

    pub fn max_poll_duration(mut self, limit: Duration) -> Self {
        self.monitor_cfg.max_poll_duration = limit;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn on_progress(mut self, cb: ProgressCallback) -> Self {
        self.on_progress = Some(cb);
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            source: self.source,
            warehouse: self.warehouse,
            monitor_cfg: self.monitor_cfg,
            cancel: self.cancel.unwrap_or_default(),
            on_progress: self.on_progress,
        }
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    started: Instant,
    created_table: bool,
    cleaned_value: Option<Watermark>,
    rows_loaded: u64,
    batches_submitted: usize,
}

impl Coordinator {
    pub fn builder(
        source: ArcDynSource,
        warehouse: ArcDynWarehouse,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(source, warehouse)
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_ref()
    }

    fn enter(&self, req: &SyncRequest, state: SyncState) {
        debug!(table = %req.dest_table, ?state, "sync state");
    }

    /// Run one sync to completion.
    ///
    /// Loads already finished when an error occurs stay in the warehouse;
    /// the next run's delta skips them.
    pub async fn sync(&self, req: &SyncRequest) -> SyncResult<SyncReport> {
        let result = self.run(req).await;
        let outcome = match &result {
            Ok(r) if r.outcome == SyncOutcome::AlreadySynced => "already_synced",
            Ok(_) => "synced",
            Err(e) => {
                self.enter(req, SyncState::Failed);
                warn!(table = %req.dest_table, kind = e.kind(), error = %e, "sync failed");
                e.kind()
            }
        };
        counter!("rowsync_runs_total", "outcome" => outcome).increment(1);
        result
    }

    async fn run(&self, req: &SyncRequest) -> SyncResult<SyncReport> {
        let mut run = RunState {
            started: Instant::now(),
            created_table: false,
            cleaned_value: None,
            rows_loaded: 0,
            batches_submitted: 0,
        };
        let mode = PlanMode::from_order_column(req.order_column.as_deref());

        self.enter(req, SyncState::Start);
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if req.force_recreate && self.warehouse.table_exists(&req.dest_table).await? {
            emit(
                self.progress(),
                SyncProgress::DroppingTable {
                    table: req.dest_table.clone(),
                },
            );
            self.warehouse.delete_table(&req.dest_table).await?;
        }

        self.enter(req, SyncState::Planning);
        emit(
            self.progress(),
            SyncProgress::Planning {
                table: req.source_table.clone(),
                mode: mode.clone(),
            },
        );
        let planner = DeltaPlanner::new(
            &self.source,
            &self.warehouse,
            &req.source_table,
            &req.dest_table,
            mode,
            req.batch_size,
            req.create_if_missing || req.force_recreate,
        );
        let mut plan = planner.plan().await?;

        let catalog = SchemaCatalog::new(self.source.list_columns(&req.source_table).await?);
        if plan.needs_create {
            self.enter(req, SyncState::CreatingTable);
            self.create_table(req, &catalog).await?;
            run.created_table = true;
        }

        if let Some(tail) = plan.cleanup.clone() {
            self.enter(req, SyncState::CleaningUp);
            let watermark = self.clean_tail(req, &plan, &tail).await?;
            run.cleaned_value = Some(tail);
            planner.resume(&mut plan, watermark).await?;
            plan.cleanup = None;
        }

        emit(
            self.progress(),
            SyncProgress::Planned {
                rows_to_sync: plan.rows_to_sync,
                batches: plan.batches.len(),
                watermark: plan.watermark.clone(),
            },
        );

        if plan.is_empty() {
            emit(
                self.progress(),
                SyncProgress::AlreadySynced {
                    table: req.dest_table.clone(),
                },
            );
            info!(table = %req.dest_table, "already synced");
            self.enter(req, SyncState::Done);
            return Ok(self.report(&plan, run, SyncOutcome::AlreadySynced));
        }

        info!(
            table = %req.dest_table,
            rows = plan.rows_to_sync,
            batches = plan.batches.len(),
            batch_size = plan.batch_size,
            "starting batch loop"
        );
        self.load_batches(req, &plan, &catalog, &mut run).await?;

        self.enter(req, SyncState::Verifying);
        self.verify(req, &plan, &run).await?;

        emit(
            self.progress(),
            SyncProgress::Done {
                rows_loaded: run.rows_loaded,
                batches: run.batches_submitted,
            },
        );
        self.enter(req, SyncState::Done);
        Ok(self.report(&plan, run, SyncOutcome::Synced))
    }

    async fn create_table(&self, req: &SyncRequest, catalog: &SchemaCatalog) -> SyncResult<()> {
        let specs = catalog.dest_specs(&req.ignore_columns);
        emit(
            self.progress(),
            SyncProgress::CreatingTable {
                table: req.dest_table.clone(),
                columns: specs.len(),
            },
        );

        self.warehouse
            .create_table(&req.dest_table, &specs)
            .await
            .map_err(|e| match e {
                WarehouseError::Rejected { details, .. }
                | WarehouseError::NotFound { details }
                | WarehouseError::Auth { details } => SyncError::SchemaCreation {
                    table: req.dest_table.clone(),
                    details: details.into_owned(),
                },
                other => other.into(),
            })
    }

    async fn clean_tail(
        &self,
        req: &SyncRequest,
        plan: &SyncPlan,
        tail: &Watermark,
    ) -> SyncResult<Option<Watermark>> {
        let column = plan.mode.order_column().unwrap_or_default();
        let compensation =
            TailCompensation::new(self.warehouse.as_ref(), &req.dest_table, column);
        emit(
            self.progress(),
            SyncProgress::CleaningTail {
                column: compensation.column().to_owned(),
                value: tail.clone(),
            },
        );

        let watermark = compensation.apply(tail).await?;
        emit(
            self.progress(),
            SyncProgress::TailCleaned {
                column: compensation.column().to_owned(),
                watermark: watermark.clone(),
            },
        );
        Ok(watermark)
    }

    /// Read, transform, encode and submit each window.
    ///
    /// The first job is awaited right away so systemic failures (auth,
    /// schema) surface before more work is queued. After that, batch N+1
    /// is built while job N runs, and job N is awaited just before N+1 is
    /// submitted.
    async fn load_batches(
        &self,
        req: &SyncRequest,
        plan: &SyncPlan,
        catalog: &SchemaCatalog,
        run: &mut RunState,
    ) -> SyncResult<()> {
        let monitor = LoadJobMonitor::new(
            self.warehouse.clone(),
            req.dest_table.clone(),
            self.monitor_cfg,
            self.cancel.clone(),
        );
        let mut in_flight = InFlight::None;
        let result = self
            .batch_loop(req, plan, catalog, run, &monitor, &mut in_flight)
            .await;

        match (result, in_flight.take()) {
            (Ok(()), None) => Ok(()),
            (Ok(()), Some(last)) => self.complete(&monitor, last, run).await,
            (Err(e), None) => Err(e),
            (Err(SyncError::Cancelled), Some(job)) => {
                warn!(job_id = %job.handle, "cancelled with a load job still running");
                Err(SyncError::Cancelled)
            }
            (Err(e), Some(job)) => {
                // The earlier job's outcome decides which error is reported.
                warn!(
                    job_id = %job.handle,
                    error = %e,
                    "batch failed, waiting for the running load job"
                );
                match self.complete(&monitor, job, run).await {
                    Ok(()) => Err(e),
                    Err(earlier) => {
                        warn!(later_error = %e, "load job failed before the batch error");
                        Err(earlier)
                    }
                }
            }
        }
    }

    /// On return, `in_flight` holds the job still running, if any.
    async fn batch_loop(
        &self,
        req: &SyncRequest,
        plan: &SyncPlan,
        catalog: &SchemaCatalog,
        run: &mut RunState,
        monitor: &LoadJobMonitor,
        in_flight: &mut InFlight,
    ) -> SyncResult<()> {
        let mut encoder = BatchEncoder::new();
        let total = plan.batches.len();

        for (i, window) in plan.batches.iter().enumerate() {
            let index = i + 1;
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.enter(req, SyncState::Batching(index));

            let build_start = Instant::now();
            let rows = self
                .source
                .query_rows(&req.source_table, &plan.query(*window))
                .await?;
            if rows.is_empty() {
                emit(self.progress(), SyncProgress::BatchSkipped { index, total });
                continue;
            }

            encoder.clear();
            for row in rows {
                let record = transform_row(row, catalog, &req.ignore_columns)?;
                encoder.push(&record)?;
            }
            let row_count = encoder.len();
            let payload = encoder.finish();
            histogram!("rowsync_batch_build_seconds")
                .record(build_start.elapsed().as_secs_f64());

            if let Some(prev) = in_flight.take() {
                self.complete(monitor, prev, run).await?;
            }

            let job = monitor.submit(payload, index, row_count).await?;
            run.batches_submitted += 1;
            emit(
                self.progress(),
                SyncProgress::BatchSubmitted {
                    index,
                    total,
                    rows: row_count,
                    job_id: job.handle.id.clone(),
                },
            );

            if run.batches_submitted == 1 {
                self.complete(monitor, job, run).await?;
            } else {
                *in_flight = InFlight::Submitted(job);
            }
        }
        Ok(())
    }

    async fn complete(
        &self,
        monitor: &LoadJobMonitor,
        job: SubmittedJob,
        run: &mut RunState,
    ) -> SyncResult<()> {
        let done = monitor.await_completion(job, self.progress()).await?;
        run.rows_loaded += done.rows as u64;
        Ok(())
    }

    /// Row-count mode only: warehouse metadata lags, so a mismatch is a
    /// warning.
    async fn verify(&self, req: &SyncRequest, plan: &SyncPlan, run: &RunState) -> SyncResult<()> {
        if plan.mode != PlanMode::RowCount {
            return Ok(());
        }

        let expected_rows = plan.dest_rows + run.rows_loaded;
        let warehouse_rows = self.warehouse.count_rows(&req.dest_table).await?;
        if warehouse_rows != Some(expected_rows) {
            warn!(
                table = %req.dest_table,
                expected_rows,
                warehouse_rows = ?warehouse_rows,
                "warehouse row count differs after load"
            );
        }
        emit(
            self.progress(),
            SyncProgress::Verified {
                expected_rows,
                warehouse_rows,
            },
        );
        Ok(())
    }

    fn report(&self, plan: &SyncPlan, run: RunState, outcome: SyncOutcome) -> SyncReport {
        SyncReport {
            outcome,
            rows_planned: plan.rows_to_sync,
            rows_loaded: run.rows_loaded,
            batches_planned: plan.batches.len(),
            batches_submitted: run.batches_submitted,
            cleaned_value: run.cleaned_value,
            created_table: run.created_table,
            elapsed: run.started.elapsed(),
        }
    }
}

//! Load job submission and polling.
//!
//! The monitor owns no queue: the orchestrator keeps at most one
//! [`SubmittedJob`] in its [`InFlight`] slot and awaits it before handing
//! the next payload to [`LoadJobMonitor::submit`].

use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{RetryOutcome, watchdog};
use metrics::{counter, histogram};
use rowsync_core::{
    ArcDynWarehouse, JobHandle, JobState, SyncError, SyncResult, WarehouseError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::progress::{ProgressCallback, SyncProgress, emit};

/// Consecutive failed polls tolerated before giving up on a job.
const MAX_POLL_FAILURES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Upper bound on waiting for one job; exceeding it is
    /// [`SyncError::LoadJobTimeout`].
    pub max_poll_duration: Duration,
    /// Bound on a single status request.
    pub request_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_duration: Duration::from_secs(6 * 60 * 60),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub handle: JobHandle,
    /// 1-based batch index.
    pub batch: usize,
    pub rows: usize,
    pub submitted_at: Instant,
}

/// The orchestrator's single in-flight slot.
#[derive(Debug, Default)]
pub enum InFlight {
    #[default]
    None,
    Submitted(SubmittedJob),
}

impl InFlight {
    pub fn take(&mut self) -> Option<SubmittedJob> {
        match std::mem::take(self) {
            InFlight::None => None,
            InFlight::Submitted(job) => Some(job),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, InFlight::None)
    }
}

/// What a finished job contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedJob {
    pub rows: usize,
    pub elapsed: Duration,
    pub polls: u32,
}

pub struct LoadJobMonitor {
    warehouse: ArcDynWarehouse,
    table: String,
    cfg: MonitorConfig,
    cancel: CancellationToken,
}

impl LoadJobMonitor {
    pub fn new(
        warehouse: ArcDynWarehouse,
        table: impl Into<String>,
        cfg: MonitorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            warehouse,
            table: table.into(),
            cfg,
            cancel,
        }
    }

    /// Hand a payload to the warehouse. Returns once the job is accepted.
    pub async fn submit(
        &self,
        payload: Bytes,
        batch: usize,
        rows: usize,
    ) -> SyncResult<SubmittedJob> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let bytes = payload.len();
        let handle = self.warehouse.submit_load(&self.table, payload).await?;

        counter!("rowsync_batches_submitted_total", "table" => self.table.clone())
            .increment(1);
        histogram!("rowsync_batch_bytes", "table" => self.table.clone())
            .record(bytes as f64);
        debug!(job_id = %handle, batch, rows, bytes, "load job submitted");

        Ok(SubmittedJob {
            handle,
            batch,
            rows,
            submitted_at: Instant::now(),
        })
    }

    /// Poll until the job is terminal, the deadline passes or the run is
    /// cancelled.
    pub async fn await_completion(
        &self,
        job: SubmittedJob,
        on_progress: Option<&ProgressCallback>,
    ) -> SyncResult<CompletedJob> {
        let started = Instant::now();
        let mut polls = 0u32;
        let mut failures = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                warn!(job_id = %job.handle, "cancelled while a load job is running");
                return Err(SyncError::Cancelled);
            }

            let waited = started.elapsed();
            if waited >= self.cfg.max_poll_duration {
                counter!("rowsync_load_jobs_total", "outcome" => "timeout").increment(1);
                return Err(SyncError::LoadJobTimeout {
                    job_id: job.handle.id.clone(),
                    waited,
                });
            }

            polls += 1;
            counter!("rowsync_job_polls_total").increment(1);

            let polled = watchdog(
                self.warehouse.poll_job(&job.handle),
                self.cfg.request_timeout,
                &self.cancel,
                "poll_job",
            )
            .await;

            match polled {
                Ok(status) => {
                    failures = 0;
                    match status.state {
                        JobState::Succeeded => return Ok(self.finished(&job, polls, on_progress)),
                        JobState::Failed => {
                            counter!("rowsync_load_jobs_total", "outcome" => "failed")
                                .increment(1);
                            return Err(SyncError::LoadJob {
                                job_id: job.handle.id.clone(),
                                errors: status.errors,
                            });
                        }
                        state @ (JobState::Pending | JobState::Running) => emit(
                            on_progress,
                            SyncProgress::PollTick {
                                job_id: job.handle.id.clone(),
                                state,
                                waited: started.elapsed(),
                            },
                        ),
                    }
                }
                Err(RetryOutcome::Cancelled) => return Err(SyncError::Cancelled),
                Err(outcome) => {
                    let err = match outcome {
                        RetryOutcome::Timeout { action } => {
                            WarehouseError::Timeout { action }
                        }
                        RetryOutcome::Failed(e)
                        | RetryOutcome::Exhausted { last_error: e, .. } => e,
                        RetryOutcome::Cancelled => WarehouseError::Cancelled,
                    };
                    failures += 1;
                    if !err.is_transient() || failures >= MAX_POLL_FAILURES {
                        return Err(err.into());
                    }
                    warn!(
                        job_id = %job.handle,
                        failures,
                        error = %err,
                        "job status poll failed, will retry"
                    );
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
            }
        }
    }

    fn finished(
        &self,
        job: &SubmittedJob,
        polls: u32,
        on_progress: Option<&ProgressCallback>,
    ) -> CompletedJob {
        let elapsed = job.submitted_at.elapsed();
        counter!("rowsync_load_jobs_total", "outcome" => "succeeded").increment(1);
        counter!("rowsync_rows_loaded_total", "table" => self.table.clone())
            .increment(job.rows as u64);
        histogram!("rowsync_load_job_seconds").record(elapsed.as_secs_f64());

        emit(
            on_progress,
            SyncProgress::JobFinished {
                job_id: job.handle.id.clone(),
                rows: job.rows,
                elapsed,
            },
        );
        CompletedJob {
            rows: job.rows,
            elapsed,
            polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rowsync_core::{ArcDynWarehouse, Warehouse};
    use sinks::MemWarehouse;

    fn fast() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(1),
            max_poll_duration: Duration::from_secs(5),
            request_timeout: Duration::from_secs(1),
        }
    }

    async fn warehouse(mem: MemWarehouse) -> (Arc<MemWarehouse>, ArcDynWarehouse) {
        mem.create_table("t", &[]).await.unwrap();
        let mem = Arc::new(mem);
        let dyn_wh: ArcDynWarehouse = mem.clone();
        (mem, dyn_wh)
    }

    fn payload() -> Bytes {
        Bytes::from_static(b"{\"a\":1}\n{\"a\":2}\n")
    }

    #[tokio::test]
    async fn polls_until_succeeded() {
        let (mem, wh) = warehouse(MemWarehouse::new().with_polls_to_complete(4)).await;
        let monitor = LoadJobMonitor::new(wh, "t", fast(), CancellationToken::new());

        let job = monitor.submit(payload(), 1, 2).await.unwrap();
        let done = monitor.await_completion(job, None).await.unwrap();

        assert_eq!(done.rows, 2);
        assert_eq!(done.polls, 4);
        assert_eq!(mem.count_rows("t").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn failed_job_carries_server_errors() {
        let (_, wh) = warehouse(
            MemWarehouse::new().with_failing_load(0, vec!["row 2: bad".into(), "too many".into()]),
        )
        .await;
        let monitor = LoadJobMonitor::new(wh, "t", fast(), CancellationToken::new());

        let job = monitor.submit(payload(), 1, 2).await.unwrap();
        match monitor.await_completion(job, None).await.unwrap_err() {
            SyncError::LoadJob { job_id, errors } => {
                assert_eq!(job_id, "mem_job_1");
                assert_eq!(errors, vec!["row 2: bad".to_string(), "too many".to_string()]);
            }
            other => panic!("expected LoadJob, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stuck_job_times_out() {
        let (_, wh) = warehouse(MemWarehouse::new().with_stuck_jobs()).await;
        let cfg = MonitorConfig {
            max_poll_duration: Duration::from_millis(30),
            ..fast()
        };
        let monitor = LoadJobMonitor::new(wh, "t", cfg, CancellationToken::new());

        let job = monitor.submit(payload(), 1, 2).await.unwrap();
        let err = monitor.await_completion(job, None).await.unwrap_err();
        assert!(matches!(err, SyncError::LoadJobTimeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn cancellation_stops_polling() {
        let (_, wh) = warehouse(MemWarehouse::new().with_stuck_jobs()).await;
        let cancel = CancellationToken::new();
        let monitor = LoadJobMonitor::new(wh, "t", fast(), cancel.clone());

        let job = monitor.submit(payload(), 1, 2).await.unwrap();
        let waiter = monitor.await_completion(job, None);
        cancel.cancel();
        assert!(matches!(waiter.await, Err(SyncError::Cancelled)));
        assert!(matches!(
            monitor.submit(payload(), 2, 2).await,
            Err(SyncError::Cancelled)
        ));
    }

    #[test]
    fn in_flight_slot_take() {
        let mut slot = InFlight::Submitted(SubmittedJob {
            handle: JobHandle::new("j"),
            batch: 1,
            rows: 1,
            submitted_at: Instant::now(),
        });
        assert!(!slot.is_none());
        assert_eq!(slot.take().map(|j| j.batch), Some(1));
        assert!(slot.is_none());
        assert!(slot.take().is_none());
    }
}

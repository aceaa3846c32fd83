//! In-memory warehouse for tests.
//!
//! A submitted load stays in flight until it has been polled a
//! configurable number of times. Only then are its rows appended, so
//! counts and maxima reflect completed loads the way a real warehouse
//! does. The number of concurrently unfinished jobs is tracked so tests
//! can assert that the engine never overlaps two loads.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use rowsync_core::{
    BatchRecord, ColumnSpec, JobHandle, JobStatus, Warehouse, WarehouseError,
    WarehouseResult, Watermark,
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct MemTable {
    columns: Vec<ColumnSpec>,
    rows: Vec<BatchRecord>,
}

#[derive(Debug)]
struct MemJob {
    table: String,
    rows: Vec<BatchRecord>,
    polls: u32,
    fail_with: Option<Vec<String>>,
    finished: Option<JobStatus>,
}

/// One accepted load, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedLoad {
    pub table: String,
    pub job_id: String,
    pub rows: usize,
    /// Jobs still unfinished when this one was submitted.
    pub in_flight_before: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedValue {
    pub table: String,
    pub column: String,
    pub value: Watermark,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemTable>,
    jobs: HashMap<String, MemJob>,
    submitted: Vec<SubmittedLoad>,
    deletes: Vec<DeletedValue>,
    dropped: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
    polls: u64,
}

#[derive(Debug)]
pub struct MemWarehouse {
    state: Mutex<State>,
    polls_to_complete: u32,
    /// Submission index (0-based) to fail, with its error messages.
    failing_load: Option<(usize, Vec<String>)>,
    reject_create: Option<String>,
    never_finish: bool,
}

impl Default for MemWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemWarehouse {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            polls_to_complete: 1,
            failing_load: None,
            reject_create: None,
            never_finish: false,
        }
    }

    /// Jobs report `RUNNING` until polled this many times.
    pub fn with_polls_to_complete(mut self, polls: u32) -> Self {
        self.polls_to_complete = polls.max(1);
        self
    }

    /// The `index`-th submitted load (0-based) finishes as failed.
    pub fn with_failing_load(mut self, index: usize, errors: Vec<String>) -> Self {
        self.failing_load = Some((index, errors));
        self
    }

    pub fn with_rejected_create(mut self, reason: impl Into<String>) -> Self {
        self.reject_create = Some(reason.into());
        self
    }

    /// Jobs stay `RUNNING` forever.
    pub fn with_stuck_jobs(mut self) -> Self {
        self.never_finish = true;
        self
    }

    /// Seed an existing table.
    pub async fn seed_table(
        &self,
        table: &str,
        columns: Vec<ColumnSpec>,
        rows: Vec<BatchRecord>,
    ) {
        self.state
            .lock()
            .await
            .tables
            .insert(table.to_owned(), MemTable { columns, rows });
    }

    pub async fn rows(&self, table: &str) -> Vec<BatchRecord> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn columns(&self, table: &str) -> Option<Vec<ColumnSpec>> {
        self.state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.columns.clone())
    }

    pub async fn submitted(&self) -> Vec<SubmittedLoad> {
        self.state.lock().await.submitted.clone()
    }

    pub async fn deletes(&self) -> Vec<DeletedValue> {
        self.state.lock().await.deletes.clone()
    }

    pub async fn dropped_tables(&self) -> Vec<String> {
        self.state.lock().await.dropped.clone()
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight
    }

    /// Highest number of unfinished jobs ever observed.
    pub async fn max_in_flight(&self) -> usize {
        self.state.lock().await.max_in_flight
    }

    pub async fn total_polls(&self) -> u64 {
        self.state.lock().await.polls
    }
}

fn decode_ndjson(payload: &[u8]) -> WarehouseResult<Vec<BatchRecord>> {
    payload
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice::<BatchRecord>(line).map_err(Into::into))
        .collect()
}

fn missing(table: &str) -> WarehouseError {
    WarehouseError::NotFound {
        details: format!("table {table}").into(),
    }
}

#[async_trait]
impl Warehouse for MemWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn table_exists(&self, table: &str) -> WarehouseResult<bool> {
        Ok(self.state.lock().await.tables.contains_key(table))
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> WarehouseResult<()> {
        if let Some(reason) = &self.reject_create {
            return Err(WarehouseError::Rejected {
                status: 400,
                details: reason.clone().into(),
            });
        }

        let mut state = self.state.lock().await;
        if state.tables.contains_key(table) {
            return Err(WarehouseError::Rejected {
                status: 409,
                details: format!("Already Exists: table {table}").into(),
            });
        }
        state.tables.insert(
            table.to_owned(),
            MemTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> WarehouseResult<()> {
        let mut state = self.state.lock().await;
        state.tables.remove(table);
        state.dropped.push(table.to_owned());
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> WarehouseResult<Option<u64>> {
        Ok(self
            .state
            .lock()
            .await
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64))
    }

    async fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> WarehouseResult<Option<Watermark>> {
        let state = self.state.lock().await;
        let t = state.tables.get(table).ok_or_else(|| missing(table))?;

        Ok(t.rows
            .iter()
            .filter_map(|r| r.get(column).and_then(Watermark::from_json))
            .max_by(|a, b| a.compare(b)))
    }

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &Watermark,
    ) -> WarehouseResult<()> {
        let mut state = self.state.lock().await;
        let t = state.tables.get_mut(table).ok_or_else(|| missing(table))?;

        let before = t.rows.len();
        t.rows.retain(|r| {
            r.get(column).and_then(Watermark::from_json).as_ref() != Some(value)
        });
        debug!(table, column, removed = before - t.rows.len(), "mem delete");

        state.deletes.push(DeletedValue {
            table: table.to_owned(),
            column: column.to_owned(),
            value: value.clone(),
        });
        Ok(())
    }

    async fn submit_load(
        &self,
        table: &str,
        payload: Bytes,
    ) -> WarehouseResult<JobHandle> {
        let rows = decode_ndjson(&payload)?;
        let mut state = self.state.lock().await;
        if !state.tables.contains_key(table) {
            return Err(missing(table));
        }

        let index = state.submitted.len();
        let job_id = format!("mem_job_{}", index + 1);
        let fail_with = self
            .failing_load
            .as_ref()
            .filter(|(i, _)| *i == index)
            .map(|(_, errors)| errors.clone());

        let in_flight_before = state.in_flight;
        state.submitted.push(SubmittedLoad {
            table: table.to_owned(),
            job_id: job_id.clone(),
            rows: rows.len(),
            in_flight_before,
        });
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.jobs.insert(
            job_id.clone(),
            MemJob {
                table: table.to_owned(),
                rows,
                polls: 0,
                fail_with,
                finished: None,
            },
        );

        Ok(JobHandle::new(job_id))
    }

    async fn poll_job(&self, job: &JobHandle) -> WarehouseResult<JobStatus> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.polls += 1;

        let j = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| WarehouseError::NotFound {
                details: format!("job {job}").into(),
            })?;

        if let Some(done) = &j.finished {
            return Ok(done.clone());
        }

        j.polls += 1;
        if self.never_finish || j.polls < self.polls_to_complete {
            return Ok(JobStatus::running());
        }

        let status = match j.fail_with.take() {
            Some(errors) => JobStatus::failed(errors),
            None => {
                let rows = std::mem::take(&mut j.rows);
                let t = state
                    .tables
                    .get_mut(&j.table)
                    .ok_or_else(|| missing(&j.table))?;
                t.rows.extend(rows);
                JobStatus::succeeded()
            }
        };
        j.finished = Some(status.clone());
        state.in_flight = state.in_flight.saturating_sub(1);
        Ok(status)
    }
}

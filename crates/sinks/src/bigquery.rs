//! BigQuery warehouse.
//!
//! Metadata and DML go through the v2 REST API. Loads are multipart
//! uploads of an NDJSON payload that create an append job, which the
//! caller then polls with [`Warehouse::poll_job`].

mod bq_api;
mod bq_auth;
mod bq_client;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use common::redact_token;
use rowsync_config::{DEFAULT_WAREHOUSE_ENDPOINT, WarehouseCfg};
use rowsync_core::{
    ColumnSpec, JobHandle, JobState, JobStatus, Warehouse, WarehouseError,
    WarehouseResult, Watermark,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bq_api::{
    Job, JobReference, QueryParameter, QueryRequest, QueryResponse, Table,
    TableReference, TableSchema, load_job_metadata,
};
use bq_auth::TokenSource;
use bq_client::BqClient;

const QUERY_WAIT_MS: u64 = 10_000;
const QUERY_POLL: Duration = Duration::from_millis(500);
const QUERY_DEADLINE: Duration = Duration::from_secs(10 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct BigQueryWarehouse {
    client: BqClient,
    api_root: String,
    upload_root: String,
    project_id: String,
    dataset: String,
    location: Option<String>,
    cancel: CancellationToken,
}

impl BigQueryWarehouse {
    pub fn new(cfg: &WarehouseCfg, cancel: CancellationToken) -> WarehouseResult<Self> {
        let endpoint = cfg
            .endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_WAREHOUSE_ENDPOINT)
            .trim_end_matches('/');

        let auth = TokenSource::select(
            cfg.access_token.as_deref(),
            cfg.key_file.as_deref(),
        )?;
        let auth_kind = auth.kind();
        let client = BqClient::new(auth, REQUEST_TIMEOUT, cancel.clone())?;

        info!(
            endpoint,
            project = %cfg.project_id,
            dataset = %cfg.dataset,
            auth = auth_kind,
            token = %cfg.access_token.as_deref().map(redact_token).unwrap_or_default(),
            "bigquery warehouse configured"
        );

        Ok(Self {
            client,
            api_root: format!("{endpoint}/bigquery/v2/projects/{}", cfg.project_id),
            upload_root: format!(
                "{endpoint}/upload/bigquery/v2/projects/{}",
                cfg.project_id
            ),
            project_id: cfg.project_id.clone(),
            dataset: cfg.dataset.clone(),
            location: cfg.location.clone().filter(|l| !l.is_empty()),
            cancel,
        })
    }

    fn table_ref(&self, table: &str) -> TableReference {
        TableReference {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset.clone(),
            table_id: table.to_owned(),
        }
    }

    fn tables_url(&self) -> String {
        format!("{}/datasets/{}/tables", self.api_root, self.dataset)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.tables_url())
    }

    /// `` `project.dataset.table` `` for standard SQL.
    fn qualified(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset, table)
    }

    fn location_query(&self) -> String {
        self.location
            .as_deref()
            .map(|l| format!("&location={l}"))
            .unwrap_or_default()
    }

    async fn get_table(&self, table: &str) -> WarehouseResult<Option<Table>> {
        self.client
            .get_json::<Table>(&self.table_url(table), "tables.get")
            .await
    }

    /// Run a standard SQL statement and wait for it to finish.
    async fn run_query(
        &self,
        sql: String,
        params: Vec<QueryParameter>,
    ) -> WarehouseResult<QueryResponse> {
        debug!(sql = %sql, "warehouse query");
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            parameter_mode: (!params.is_empty()).then(|| "NAMED".to_owned()),
            query_parameters: params,
            location: self.location.clone(),
            timeout_ms: QUERY_WAIT_MS,
            request_id: Uuid::new_v4().to_string(),
        };

        let url = format!("{}/queries", self.api_root);
        let mut resp: QueryResponse = self
            .client
            .post_json(&url, &request, "jobs.query", true)
            .await?;

        let started = Instant::now();
        while !resp.job_complete {
            let job_id = match &resp.job_reference {
                Some(r) => r.job_id.clone(),
                None => {
                    return Err(WarehouseError::Protocol {
                        details: "incomplete query without a job reference".into(),
                    });
                }
            };
            if started.elapsed() > QUERY_DEADLINE {
                return Err(WarehouseError::Timeout {
                    action: format!("query job {job_id}").into(),
                });
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(WarehouseError::Cancelled),
                _ = tokio::time::sleep(QUERY_POLL) => {}
            }

            let url = format!(
                "{}/queries/{job_id}?timeoutMs={QUERY_WAIT_MS}{}",
                self.api_root,
                self.location_query()
            );
            resp = self
                .client
                .get_json(&url, "jobs.getQueryResults")
                .await?
                .ok_or_else(|| WarehouseError::NotFound {
                    details: format!("query job {job_id}").into(),
                })?;
        }

        let errors = resp.error_messages();
        if !errors.is_empty() {
            return Err(WarehouseError::Rejected {
                status: 400,
                details: errors.join("; ").into(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &str {
        "bigquery"
    }

    async fn table_exists(&self, table: &str) -> WarehouseResult<bool> {
        Ok(self.get_table(table).await?.is_some())
    }

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> WarehouseResult<()> {
        let body = Table {
            table_reference: self.table_ref(table),
            schema: Some(TableSchema::from_specs(columns)),
            num_rows: None,
        };

        // Not idempotent: a retried insert would report 409 Already Exists.
        let created: Table = self
            .client
            .post_json(&self.tables_url(), &body, "tables.insert", false)
            .await?;

        info!(
            table = %created.table_reference.table_id,
            columns = columns.len(),
            "created warehouse table"
        );
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> WarehouseResult<()> {
        if self.client.delete(&self.table_url(table), "tables.delete").await? {
            info!(table, "deleted warehouse table");
        } else {
            debug!(table, "warehouse table already absent");
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> WarehouseResult<Option<u64>> {
        let Some(meta) = self.get_table(table).await? else {
            return Ok(None);
        };

        let rows = match meta.num_rows.as_deref() {
            Some(n) => n.parse().map_err(|_| WarehouseError::Protocol {
                details: format!("numRows is not a number: {n}").into(),
            })?,
            None => 0,
        };
        Ok(Some(rows))
    }

    async fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> WarehouseResult<Option<Watermark>> {
        let sql = format!("SELECT MAX(`{column}`) FROM {}", self.qualified(table));
        Ok(self.run_query(sql, Vec::new()).await?.first_scalar())
    }

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &Watermark,
    ) -> WarehouseResult<()> {
        let meta = self.get_table(table).await?.ok_or_else(|| {
            WarehouseError::NotFound {
                details: format!("table {table}").into(),
            }
        })?;
        let kind = meta
            .schema
            .as_ref()
            .and_then(|s| s.field_type(column))
            .ok_or_else(|| WarehouseError::NotFound {
                details: format!("column {column} in {table}").into(),
            })?
            .to_owned();

        let sql = format!(
            "DELETE FROM {} WHERE `{column}` = @value",
            self.qualified(table)
        );
        let resp = self
            .run_query(sql, vec![QueryParameter::scalar("value", &kind, value)])
            .await?;

        info!(
            table,
            column,
            value = %value,
            deleted = resp.affected_rows(),
            "removed tail rows"
        );
        Ok(())
    }

    async fn submit_load(
        &self,
        table: &str,
        payload: Bytes,
    ) -> WarehouseResult<JobHandle> {
        let job_ref = JobReference {
            project_id: self.project_id.clone(),
            job_id: format!("rowsync_{}", Uuid::new_v4().simple()),
            location: self.location.clone(),
        };
        let metadata = load_job_metadata(&job_ref, &self.table_ref(table));
        let bytes = payload.len();

        let url = format!("{}/jobs?uploadType=multipart", self.upload_root);
        let job: Job = self.client.upload(&url, &metadata, payload).await?;

        let status = job.status.to_status();
        if status.state == JobState::Failed {
            warn!(
                job_id = %job.job_reference.job_id,
                errors = ?status.errors,
                "load job rejected on submit"
            );
        }

        debug!(
            table,
            job_id = %job.job_reference.job_id,
            bytes,
            "load job submitted"
        );
        Ok(JobHandle {
            id: job.job_reference.job_id,
            location: job.job_reference.location.or(job_ref.location),
        })
    }

    async fn poll_job(&self, job: &JobHandle) -> WarehouseResult<JobStatus> {
        let location = job
            .location
            .as_deref()
            .or(self.location.as_deref())
            .map(|l| format!("?location={l}"))
            .unwrap_or_default();
        let url = format!("{}/jobs/{}{location}", self.api_root, job.id);

        let resource: Job = self
            .client
            .get_json(&url, "jobs.get")
            .await?
            .ok_or_else(|| WarehouseError::NotFound {
                details: format!("job {job}").into(),
            })?;
        Ok(resource.status.to_status())
    }
}

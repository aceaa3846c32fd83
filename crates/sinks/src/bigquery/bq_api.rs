//! BigQuery v2 REST resources, limited to the fields the sink reads or
//! writes.

use rowsync_core::{ColumnSpec, JobStatus, Watermark};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableFieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<TableFieldSchema>,
}

impl TableSchema {
    pub fn from_specs(columns: &[ColumnSpec]) -> Self {
        Self {
            fields: columns
                .iter()
                .map(|c| TableFieldSchema {
                    name: c.name.clone(),
                    field_type: c.dest_type.as_str().to_owned(),
                    mode: Some("NULLABLE".to_owned()),
                })
                .collect(),
        }
    }

    pub fn field_type(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(column))
            .map(|f| f.field_type.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub table_reference: TableReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    /// int64 rendered as a string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_rows: Option<String>,
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorProto {
    fn render(&self) -> String {
        let msg = self.message.as_deref().unwrap_or("unknown error");
        match (&self.reason, &self.location) {
            (Some(r), Some(l)) => format!("{r} at {l}: {msg}"),
            (Some(r), None) => format!("{r}: {msg}"),
            _ => msg.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResource {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error_result: Option<ErrorProto>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

impl JobStatusResource {
    /// Map the wire status to [`JobStatus`].
    ///
    /// A finished job that reports any error, even alongside a result,
    /// counts as failed.
    pub fn to_status(&self) -> JobStatus {
        match self.state.as_deref() {
            Some("DONE") => {
                let mut errors: Vec<String> =
                    self.error_result.iter().map(ErrorProto::render).collect();
                for e in &self.errors {
                    let rendered = e.render();
                    if !errors.contains(&rendered) {
                        errors.push(rendered);
                    }
                }
                if errors.is_empty() {
                    JobStatus::succeeded()
                } else {
                    JobStatus::failed(errors)
                }
            }
            Some("RUNNING") => JobStatus::running(),
            _ => JobStatus::pending(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: JobStatusResource,
}

/// `jobs.insert` metadata for an NDJSON append load.
pub fn load_job_metadata(
    job: &JobReference,
    destination: &TableReference,
) -> Value {
    serde_json::json!({
        "jobReference": job,
        "configuration": {
            "load": {
                "destinationTable": destination,
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
                "createDisposition": "CREATE_NEVER",
            }
        }
    })
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub parameter_value: ParameterValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterType {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParameterValue {
    pub value: String,
}

impl QueryParameter {
    pub fn scalar(name: &str, kind: &str, value: &Watermark) -> Self {
        Self {
            name: name.to_owned(),
            parameter_type: ParameterType {
                kind: kind.to_owned(),
            },
            parameter_value: ParameterValue {
                value: value.as_str().to_owned(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub query: String,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<QueryParameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub timeout_ms: u64,
    /// Makes a retried `jobs.query` idempotent.
    pub request_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub v: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowCells {
    #[serde(default)]
    pub f: Vec<Cell>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub job_complete: bool,
    #[serde(default)]
    pub job_reference: Option<JobReference>,
    #[serde(default)]
    pub rows: Vec<RowCells>,
    #[serde(default)]
    pub num_dml_affected_rows: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

impl QueryResponse {
    /// First column of the first row; `None` for no rows or SQL NULL.
    pub fn first_scalar(&self) -> Option<Watermark> {
        self.rows
            .first()
            .and_then(|r| r.f.first())
            .and_then(|c| Watermark::from_json(&c.v))
    }

    pub fn affected_rows(&self) -> u64 {
        self.num_dml_affected_rows
            .as_deref()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ErrorProto::render).collect()
    }
}

/// `{"error": {"code": 404, "message": "..."}}` envelope on failures.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rowsync_core::{DestType, JobState};
    use serde_json::json;

    #[test]
    fn done_without_errors_succeeds() {
        let job: Job = serde_json::from_value(json!({
            "jobReference": {"projectId": "p", "jobId": "j1", "location": "EU"},
            "status": {"state": "DONE"}
        }))
        .unwrap();
        assert_eq!(job.status.to_status(), JobStatus::succeeded());
        assert_eq!(job.job_reference.location.as_deref(), Some("EU"));
    }

    #[test]
    fn done_with_errors_fails_with_all_messages() {
        let status: JobStatusResource = serde_json::from_value(json!({
            "state": "DONE",
            "errorResult": {"reason": "invalid", "message": "Error while reading data"},
            "errors": [
                {"reason": "invalid", "message": "Error while reading data"},
                {"reason": "invalid", "location": "line 3", "message": "bad DATE"}
            ]
        }))
        .unwrap();
        assert_eq!(
            status.to_status(),
            JobStatus::failed(vec![
                "invalid: Error while reading data".into(),
                "invalid at line 3: bad DATE".into(),
            ])
        );
    }

    #[test]
    fn running_and_pending() {
        let running = JobStatusResource {
            state: Some("RUNNING".into()),
            ..Default::default()
        };
        assert_eq!(running.to_status().state, JobState::Running);
        assert_eq!(
            JobStatusResource::default().to_status().state,
            JobState::Pending
        );
    }

    #[test]
    fn schema_from_specs_is_nullable() {
        let schema = TableSchema::from_specs(&[
            ColumnSpec {
                name: "id".into(),
                dest_type: DestType::Integer,
            },
            ColumnSpec {
                name: "day".into(),
                dest_type: DestType::Date,
            },
        ]);
        assert_eq!(
            serde_json::to_value(&schema).unwrap(),
            json!({"fields": [
                {"name": "id", "type": "INTEGER", "mode": "NULLABLE"},
                {"name": "day", "type": "DATE", "mode": "NULLABLE"}
            ]})
        );
        assert_eq!(schema.field_type("DAY"), Some("DATE"));
    }

    #[test]
    fn query_response_scalars() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "rows": [{"f": [{"v": "2024-01-05"}]}],
            "numDmlAffectedRows": "17"
        }))
        .unwrap();
        assert_eq!(resp.first_scalar(), Some(Watermark::new("2024-01-05")));
        assert_eq!(resp.affected_rows(), 17);

        let empty: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "rows": [{"f": [{"v": null}]}]
        }))
        .unwrap();
        assert_eq!(empty.first_scalar(), None);
    }

    #[test]
    fn load_metadata_shape() {
        let meta = load_job_metadata(
            &JobReference {
                project_id: "p".into(),
                job_id: "rowsync_1".into(),
                location: None,
            },
            &TableReference {
                project_id: "p".into(),
                dataset_id: "d".into(),
                table_id: "t".into(),
            },
        );
        assert_eq!(
            meta["configuration"]["load"]["sourceFormat"],
            "NEWLINE_DELIMITED_JSON"
        );
        assert_eq!(meta["configuration"]["load"]["writeDisposition"], "WRITE_APPEND");
        assert_eq!(meta["jobReference"]["jobId"], "rowsync_1");
    }
}

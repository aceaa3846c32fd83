use std::borrow::Cow;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub use crate::encoding::EncodingError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout during {action}")]
    Timeout { action: Cow<'static, str> },

    #[error("connection error: {details}")]
    Connect { details: Cow<'static, str> },

    #[error("authentication error: {details}")]
    Auth { details: Cow<'static, str> },

    #[error("resource not found: {details}")]
    NotFound { details: Cow<'static, str> },

    #[error("query failed: {details}")]
    Query { details: Cow<'static, str> },

    #[error("schema issues: {details}")]
    Schema { details: Cow<'static, str> },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Cancelled => "cancelled",
            SourceError::Timeout { .. } => "timeout",
            SourceError::Connect { .. } => "connect error",
            SourceError::Auth { .. } => "auth error",
            SourceError::NotFound { .. } => "not found",
            SourceError::Query { .. } => "query error",
            SourceError::Schema { .. } => "schema error",
            SourceError::Io(_) => "io error",
            SourceError::Other(_) => "other error",
        }
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("timeout during {action}")]
    Timeout { action: Cow<'static, str> },

    #[error("connection error: {details}")]
    Connect { details: Cow<'static, str> },

    #[error("auth error: {details}")]
    Auth { details: Cow<'static, str> },

    #[error("not found: {details}")]
    NotFound { details: Cow<'static, str> },

    /// The service answered, but refused the request.
    #[error("request rejected ({status}): {details}")]
    Rejected {
        status: u16,
        details: Cow<'static, str>,
    },

    /// Retryable on the service side (rate limit, 5xx).
    #[error("service unavailable ({status}): {details}")]
    Unavailable {
        status: u16,
        details: Cow<'static, str>,
    },

    #[error("unexpected response: {details}")]
    Protocol { details: Cow<'static, str> },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WarehouseError {
    pub fn kind(&self) -> &'static str {
        match self {
            WarehouseError::Cancelled => "cancelled",
            WarehouseError::Timeout { .. } => "timeout",
            WarehouseError::Connect { .. } => "connect error",
            WarehouseError::Auth { .. } => "auth error",
            WarehouseError::NotFound { .. } => "not found",
            WarehouseError::Rejected { .. } => "rejected",
            WarehouseError::Unavailable { .. } => "unavailable",
            WarehouseError::Protocol { .. } => "protocol error",
            WarehouseError::Serialization(_) => "serialization error",
            WarehouseError::Io(_) => "io error",
            WarehouseError::Other(_) => "other error",
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WarehouseError::Timeout { .. }
                | WarehouseError::Connect { .. }
                | WarehouseError::Unavailable { .. }
                | WarehouseError::Io(_)
        )
    }
}

/// Run-level failures, surfaced to whoever invoked the sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "destination table `{table}` does not exist and creation was not requested"
    )]
    TableNotFound { table: String },

    #[error("column `{column}` is not part of the cached source schema")]
    SchemaMismatch { column: String },

    #[error("destination rejected creation of table `{table}`: {details}")]
    SchemaCreation { table: String, details: String },

    #[error("load job {job_id} failed: {}", errors.join("; "))]
    LoadJob { job_id: String, errors: Vec<String> },

    #[error("load job {job_id} still running after {waited:?}")]
    LoadJobTimeout { job_id: String, waited: Duration },

    #[error("sync cancelled")]
    Cancelled,

    #[error("source: {0}")]
    Source(#[from] SourceError),

    #[error("warehouse: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl SyncError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::TableNotFound { .. } => "table_not_found",
            SyncError::SchemaMismatch { .. } => "schema_mismatch",
            SyncError::SchemaCreation { .. } => "schema_creation",
            SyncError::LoadJob { .. } => "load_job",
            SyncError::LoadJobTimeout { .. } => "load_job_timeout",
            SyncError::Cancelled => "cancelled",
            SyncError::Source(_) => "source",
            SyncError::Warehouse(_) => "warehouse",
            SyncError::Encoding(_) => "encoding",
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;
pub type WarehouseResult<T> = Result<T, WarehouseError>;
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_job_error_joins_messages() {
        let err = SyncError::LoadJob {
            job_id: "job_1".into(),
            errors: vec!["row 3: bad date".into(), "too many errors".into()],
        };
        assert_eq!(
            err.to_string(),
            "load job job_1 failed: row 3: bad date; too many errors"
        );
        assert_eq!(err.kind(), "load_job");
    }

    #[test]
    fn transient_classification() {
        assert!(
            WarehouseError::Unavailable {
                status: 503,
                details: "backend".into()
            }
            .is_transient()
        );
        assert!(
            !WarehouseError::Rejected {
                status: 400,
                details: "invalid".into()
            }
            .is_transient()
        );
        assert!(!WarehouseError::Cancelled.is_transient());
    }
}

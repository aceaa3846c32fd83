//! Rowsync Core Types
//!
//! Data model shared by the connectors and the sync engine: column
//! descriptors and destination specs, raw source cells, batch records,
//! load jobs and watermarks, together with the two connector traits the
//! engine drives ([`SourceConnector`] and [`Warehouse`]).
//!
//! The pure pieces of the pipeline live here too: the type mapper
//! ([`map_column_type`], [`coerce_value`]), the row transformer
//! ([`transform_row`]) and the NDJSON batch encoder ([`BatchEncoder`]).

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod encoding;
pub mod errors;
pub mod mapping;
pub mod transform;

pub use encoding::{BatchEncoder, EncodingError, encode_batch};
pub use errors::{
    SourceError, SourceResult, SyncError, SyncResult, WarehouseError,
    WarehouseResult,
};
pub use mapping::{coerce_value, map_column_type, normalize_text};
pub use transform::{IgnoreList, SchemaCatalog, transform_row};

// ============================================================================
// Column Types
// ============================================================================

/// Declared type of a source column, as reported by schema introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Integer,
    SmallInt,
    BigInt,
    Boolean,
    Date,
    /// DATETIME and TIMESTAMP.
    DateTime,
    Decimal,
    Float,
    Time,
    String,
    Text,
    Json,
    Enum,
    Other,
}

/// Column type understood by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DestType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Time,
}

impl DestType {
    /// Warehouse DDL name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DestType::String => "STRING",
            DestType::Integer => "INTEGER",
            DestType::Float => "FLOAT",
            DestType::Boolean => "BOOLEAN",
            DestType::Date => "DATE",
            DestType::DateTime => "DATETIME",
            DestType::Time => "TIME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Some(DestType::String),
            "INTEGER" | "INT64" => Some(DestType::Integer),
            "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => {
                Some(DestType::Float)
            }
            "BOOLEAN" | "BOOL" => Some(DestType::Boolean),
            "DATE" => Some(DestType::Date),
            "DATETIME" | "TIMESTAMP" => Some(DestType::DateTime),
            "TIME" => Some(DestType::Time),
            _ => None,
        }
    }
}

impl fmt::Display for DestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source-table column. Discovered once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub source_type: SourceType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
        }
    }
}

/// One destination column, derived from a [`ColumnDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Lowercase.
    pub name: String,
    pub dest_type: DestType,
}

impl From<&ColumnDescriptor> for ColumnSpec {
    fn from(col: &ColumnDescriptor) -> Self {
        Self {
            name: col.name.to_lowercase(),
            dest_type: map_column_type(col.source_type),
        }
    }
}

// ============================================================================
// Cells, Rows, Records
// ============================================================================

/// Driver-neutral raw cell as read from the source.
///
/// Text and decimals arrive as [`Bytes`](CellValue::Bytes) in whatever
/// encoding the source collation uses; [`coerce_value`] normalizes them.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Bytes(Vec<u8>),
    /// DATE, DATETIME and TIMESTAMP. All-zero date parts mean the
    /// zero-date sentinel.
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    },
    Time {
        negative: bool,
        days: u32,
        hours: u8,
        minutes: u8,
        seconds: u8,
        micros: u32,
    },
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Bytes(s.into().into_bytes())
    }

    pub fn datetime(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Self {
        CellValue::DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
            micros: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

/// One source row: column name to raw cell, in select order.
pub type SourceRow = Vec<(String, CellValue)>;

/// One destination-ready row. Keys are lowercase destination column names.
pub type BatchRecord = serde_json::Map<String, Value>;

// ============================================================================
// Watermark
// ============================================================================

/// Maximum value of the ordering column, rendered the way it is loaded
/// into the warehouse so source and destination maxima compare as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Watermark(String);

impl Watermark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Watermark from a coerced JSON scalar. Null and empty yield `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Bool(b) => Some(Self(b.to_string())),
            other => Some(Self(other.to_string())),
        }
    }

    /// Watermark from a raw source cell of the given column type.
    pub fn from_cell(source_type: SourceType, cell: CellValue) -> Option<Self> {
        Self::from_json(&coerce_value(source_type, cell))
    }

    /// Numeric comparison when both sides parse as numbers, otherwise
    /// lexicographic. ISO dates and datetimes order correctly either way.
    pub fn compare(&self, other: &Watermark) -> Ordering {
        match (self.0.parse::<f64>(), other.0.parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => self.0.cmp(&other.0),
        }
    }

    /// The value as a source-side SQL literal: ISO `T` separators go
    /// back to the space MySQL renders.
    pub fn to_source_literal(&self) -> String {
        let b = self.0.as_bytes();
        let looks_like_datetime = b.len() >= 19
            && b[4] == b'-'
            && b[7] == b'-'
            && b[10] == b'T'
            && b[13] == b':';
        if looks_like_datetime {
            let mut s = self.0.clone();
            s.replace_range(10..11, " ");
            s
        } else {
            self.0.clone()
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Load Jobs
// ============================================================================

/// Opaque handle to a submitted bulk-load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: None,
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

/// Snapshot of a job as reported by one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    /// Populated only when `state` is `Failed`.
    pub errors: Vec<String>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            errors: Vec::new(),
        }
    }

    pub fn running() -> Self {
        Self {
            state: JobState::Running,
            errors: Vec::new(),
        }
    }

    pub fn succeeded() -> Self {
        Self {
            state: JobState::Succeeded,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            state: JobState::Failed,
            errors,
        }
    }
}

// ============================================================================
// Source Queries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBound {
    /// `column >= value`
    Inclusive,
    /// `column > value`
    Exclusive,
}

/// Lower-bound filter for row counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: Watermark,
    pub bound: LowerBound,
}

impl RowFilter {
    pub fn after(column: impl Into<String>, value: Watermark) -> Self {
        Self {
            column: column.into(),
            value,
            bound: LowerBound::Exclusive,
        }
    }

    pub fn from(column: impl Into<String>, value: Watermark) -> Self {
        Self {
            column: column.into(),
            value,
            bound: LowerBound::Inclusive,
        }
    }
}

/// One window of source rows.
///
/// Without `order_by` the rows come in the table's natural scan order.
/// `after` filters `order_by > after` and is ignored when no ordering
/// column is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub order_by: Option<String>,
    pub after: Option<Watermark>,
    pub offset: u64,
    pub limit: u64,
}

impl RowQuery {
    pub fn window(offset: u64, limit: u64) -> Self {
        Self {
            order_by: None,
            after: None,
            offset,
            limit,
        }
    }

    pub fn ordered_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    pub fn after(mut self, watermark: Option<Watermark>) -> Self {
        self.after = watermark;
        self
    }
}

// ============================================================================
// Connector Traits
// ============================================================================

/// Relational source the rows are read from.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Connector label for logs and metrics.
    fn name(&self) -> &str;

    async fn count_rows(
        &self,
        table: &str,
        filter: Option<&RowFilter>,
    ) -> SourceResult<u64>;

    /// `MAX(column)`; [`CellValue::Null`] on an empty table.
    async fn max_value(&self, table: &str, column: &str)
    -> SourceResult<CellValue>;

    async fn list_columns(
        &self,
        table: &str,
    ) -> SourceResult<Vec<ColumnDescriptor>>;

    async fn query_rows(
        &self,
        table: &str,
        query: &RowQuery,
    ) -> SourceResult<Vec<SourceRow>>;
}

/// Columnar warehouse the rows are loaded into.
///
/// Loads are asynchronous jobs: [`submit_load`](Self::submit_load) returns
/// as soon as the payload is accepted and [`poll_job`](Self::poll_job)
/// reports progress.
#[async_trait]
pub trait Warehouse: Send + Sync {
    fn name(&self) -> &str;

    async fn table_exists(&self, table: &str) -> WarehouseResult<bool>;

    async fn create_table(
        &self,
        table: &str,
        columns: &[ColumnSpec],
    ) -> WarehouseResult<()>;

    async fn delete_table(&self, table: &str) -> WarehouseResult<()>;

    /// Row count from table metadata; `None` when the table is missing.
    async fn count_rows(&self, table: &str) -> WarehouseResult<Option<u64>>;

    async fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> WarehouseResult<Option<Watermark>>;

    async fn delete_where(
        &self,
        table: &str,
        column: &str,
        value: &Watermark,
    ) -> WarehouseResult<()>;

    async fn submit_load(
        &self,
        table: &str,
        payload: Bytes,
    ) -> WarehouseResult<JobHandle>;

    async fn poll_job(&self, job: &JobHandle) -> WarehouseResult<JobStatus>;
}

pub type ArcDynSource = Arc<dyn SourceConnector>;
pub type ArcDynWarehouse = Arc<dyn Warehouse>;

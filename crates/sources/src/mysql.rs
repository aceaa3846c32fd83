//! MySQL source.
//!
//! Reads are plain prepared statements over a `mysql_async` pool. Text and
//! DECIMAL arrive as raw bytes and are normalized later by the type mapper.

mod mysql_errors;
mod mysql_helpers;
mod mysql_types;

use std::time::Instant;

use async_trait::async_trait;
use common::{DsnComponents, RetryPolicy, redact_url_password};
use mysql_async::{Opts, OptsBuilder, Pool, Row, Value, prelude::Queryable};
use rowsync_core::{
    CellValue, ColumnDescriptor, RowFilter, RowQuery, SourceConnector,
    SourceError, SourceResult, SourceRow,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use mysql_errors::{MySqlSourceError, MySqlSourceResult};
pub use mysql_types::{cell_from_value, quote_ident, source_type_for};

use mysql_helpers::{
    COLUMNS_SQL, connect_with_retries, count_sql, max_sql, params, window_sql,
};

pub struct MySqlSource {
    pool: Pool,
    database: String,
}

impl MySqlSource {
    /// Open the pool and make sure the server answers.
    pub async fn connect(
        dsn: &str,
        database: Option<&str>,
        cancel: &CancellationToken,
    ) -> SourceResult<Self> {
        let opts = Opts::from_url(dsn)
            .map_err(|e| MySqlSourceError::InvalidDsn(e.to_string()))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if let Some(db) = database.filter(|d| !d.is_empty()) {
            builder = builder.db_name(Some(db));
        }
        let opts = Opts::from(builder);

        let database = opts
            .db_name()
            .map(str::to_owned)
            .or_else(|| {
                DsnComponents::from_url(dsn, 3306).ok().map(|c| c.database)
            })
            .unwrap_or_default();

        let pool = Pool::new(opts);
        connect_with_retries(&pool, dsn, cancel, RetryPolicy::default())
            .await?;

        info!(
            dsn = %redact_url_password(dsn),
            database = %database,
            "mysql source ready"
        );
        Ok(Self { pool, database })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    async fn conn(&self) -> SourceResult<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MySqlSourceError::from(e).into())
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(self) -> SourceResult<()> {
        self.pool
            .disconnect()
            .await
            .map_err(|e| MySqlSourceError::from(e).into())
    }
}

fn driver_err(e: mysql_async::Error) -> SourceError {
    MySqlSourceError::from(e).into()
}

#[async_trait]
impl SourceConnector for MySqlSource {
    fn name(&self) -> &str {
        "mysql"
    }

    async fn count_rows(
        &self,
        table: &str,
        filter: Option<&RowFilter>,
    ) -> SourceResult<u64> {
        let (sql, args) = count_sql(table, filter);
        let mut conn = self.conn().await?;
        let count: Option<u64> = conn
            .exec_first(sql.as_str(), params(args))
            .await
            .map_err(driver_err)?;

        debug!(table, ?filter, count = ?count, "source row count");
        Ok(count.unwrap_or(0))
    }

    async fn max_value(
        &self,
        table: &str,
        column: &str,
    ) -> SourceResult<CellValue> {
        let mut conn = self.conn().await?;
        let row: Option<Row> = conn
            .exec_first(max_sql(table, column).as_str(), ())
            .await
            .map_err(driver_err)?;

        let value = row
            .and_then(|mut r| r.take::<Value, usize>(0))
            .map(cell_from_value)
            .unwrap_or(CellValue::Null);
        Ok(value)
    }

    async fn list_columns(
        &self,
        table: &str,
    ) -> SourceResult<Vec<ColumnDescriptor>> {
        let (schema, name) = match table.split_once('.') {
            Some((db, t)) => (Some(db.to_owned()), t.to_owned()),
            None => (None, table.to_owned()),
        };

        let mut conn = self.conn().await?;
        let rows: Vec<(String, String, String)> = conn
            .exec(COLUMNS_SQL, (schema, name))
            .await
            .map_err(driver_err)?;

        if rows.is_empty() {
            return Err(MySqlSourceError::NoSuchTable {
                table: table.to_owned(),
            }
            .into());
        }

        let columns: Vec<ColumnDescriptor> = rows
            .into_iter()
            .map(|(col, data_type, column_type)| {
                ColumnDescriptor::new(
                    col,
                    source_type_for(&data_type, &column_type),
                )
            })
            .collect();

        debug!(table, columns = columns.len(), "introspected source columns");
        Ok(columns)
    }

    async fn query_rows(
        &self,
        table: &str,
        query: &RowQuery,
    ) -> SourceResult<Vec<SourceRow>> {
        let t0 = Instant::now();
        let (sql, args) = window_sql(table, query);

        let mut conn = self.conn().await?;
        let rows: Vec<Row> = conn
            .exec(sql.as_str(), params(args))
            .await
            .map_err(driver_err)?;

        let out: Vec<SourceRow> = rows.into_iter().map(row_to_source).collect();

        debug!(
            table,
            offset = query.offset,
            limit = query.limit,
            rows = out.len(),
            ms = t0.elapsed().as_millis() as u64,
            "read source window"
        );
        Ok(out)
    }
}

fn row_to_source(mut row: Row) -> SourceRow {
    let names: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let value = row.take::<Value, usize>(i).unwrap_or(Value::NULL);
            (name, cell_from_value(value))
        })
        .collect()
}

use std::time::{Duration, Instant};

use common::{RetryOutcome, RetryPolicy, redact_url_password, retry_async};
use mysql_async::{Params, Pool, Value, prelude::Queryable};
use rowsync_core::{LowerBound, RowFilter, RowQuery, SourceError, SourceResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::mysql_errors::{MySqlSourceError, is_retryable_source_error};
use super::mysql_types::quote_ident;

/// Check out a connection and ping it, retrying transient failures.
pub(super) async fn connect_with_retries(
    pool: &Pool,
    dsn: &str,
    cancel: &CancellationToken,
    retry_policy: RetryPolicy,
) -> SourceResult<()> {
    let redacted = redact_url_password(dsn);

    retry_async(
        move |_| async move {
            let t0 = Instant::now();
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| SourceError::from(MySqlSourceError::from(e)))?;
            conn.ping()
                .await
                .map_err(|e| SourceError::from(MySqlSourceError::from(e)))?;
            debug!(ms = t0.elapsed().as_millis() as u64, "mysql ping ok");
            Ok::<(), SourceError>(())
        },
        is_retryable_source_error,
        Duration::from_secs(30),
        retry_policy,
        cancel,
        "mysql_connect",
    )
    .await
    .map_err(|outcome| match outcome {
        RetryOutcome::Cancelled => SourceError::Cancelled,
        RetryOutcome::Timeout { action } => SourceError::Timeout { action },
        RetryOutcome::Exhausted {
            last_error,
            attempts,
        } => {
            warn!(dsn = %redacted, attempts, "mysql connect exhausted retries");
            last_error
        }
        RetryOutcome::Failed(e) => {
            if matches!(e, SourceError::Auth { .. }) {
                error!(dsn = %redacted, "mysql rejected the credentials");
                error!("  the sync user needs SELECT on the source database");
            }
            e
        }
    })?;

    info!(dsn = %redacted, "connected to mysql");
    Ok(())
}

// ============================================================================
// SQL builders
// ============================================================================

pub(super) fn params(values: Vec<Value>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values)
    }
}

pub(super) fn count_sql(
    table: &str,
    filter: Option<&RowFilter>,
) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let mut args = Vec::new();

    if let Some(f) = filter {
        let op = match f.bound {
            LowerBound::Inclusive => ">=",
            LowerBound::Exclusive => ">",
        };
        sql.push_str(&format!(" WHERE {} {op} ?", quote_ident(&f.column)));
        args.push(Value::from(f.value.to_source_literal()));
    }

    (sql, args)
}

pub(super) fn max_sql(table: &str, column: &str) -> String {
    format!(
        "SELECT MAX({}) FROM {}",
        quote_ident(column),
        quote_ident(table)
    )
}

/// `SELECT *` window. Ordered and filtered only when `order_by` is set.
pub(super) fn window_sql(table: &str, query: &RowQuery) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    let mut args = Vec::new();

    if let Some(col) = &query.order_by {
        let col = quote_ident(col);
        if let Some(wm) = &query.after {
            sql.push_str(&format!(" WHERE {col} > ?"));
            args.push(Value::from(wm.to_source_literal()));
        }
        sql.push_str(&format!(" ORDER BY {col} ASC"));
    }

    sql.push_str(" LIMIT ?, ?");
    args.push(Value::from(query.offset));
    args.push(Value::from(query.limit));

    (sql, args)
}

pub(super) const COLUMNS_SQL: &str = r#"
    SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_core::Watermark;

    #[test]
    fn count_without_filter() {
        let (sql, args) = count_sql("orders", None);
        assert_eq!(sql, "SELECT COUNT(*) FROM `orders`");
        assert!(args.is_empty());
    }

    #[test]
    fn count_with_exclusive_bound() {
        let f = RowFilter::after("created_at", Watermark::new("2024-01-05T00:00:00"));
        let (sql, args) = count_sql("orders", Some(&f));
        assert_eq!(sql, "SELECT COUNT(*) FROM `orders` WHERE `created_at` > ?");
        assert_eq!(args, vec![Value::from("2024-01-05 00:00:00")]);
    }

    #[test]
    fn count_with_inclusive_bound() {
        let f = RowFilter::from("id", Watermark::new("10"));
        let (sql, _) = count_sql("orders", Some(&f));
        assert!(sql.ends_with("`id` >= ?"));
    }

    #[test]
    fn ordered_window_filters_and_orders() {
        let q = RowQuery::window(40, 20)
            .ordered_by("day")
            .after(Some(Watermark::new("2024-01-05")));
        let (sql, args) = window_sql("events", &q);
        assert_eq!(
            sql,
            "SELECT * FROM `events` WHERE `day` > ? ORDER BY `day` ASC LIMIT ?, ?"
        );
        assert_eq!(
            args,
            vec![Value::from("2024-01-05"), Value::from(40u64), Value::from(20u64)]
        );
    }

    #[test]
    fn natural_window_has_no_order() {
        let (sql, args) = window_sql("events", &RowQuery::window(100, 50));
        assert_eq!(sql, "SELECT * FROM `events` LIMIT ?, ?");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn empty_params_are_empty() {
        assert!(matches!(params(vec![]), Params::Empty));
        assert!(matches!(params(vec![Value::from(1)]), Params::Positional(_)));
    }
}

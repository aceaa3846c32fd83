//! Source connectors.
//!
//! - [`MySqlSource`]: pooled `mysql_async` reader used in production
//! - [`MemSource`]: in-memory tables with the same ordering and filtering
//!   semantics, for tests

pub mod mem;
pub mod mysql;

use std::sync::Arc;

use rowsync_core::{ArcDynSource, SourceResult};
use tokio_util::sync::CancellationToken;

pub use mem::MemSource;
pub use mysql::MySqlSource;

/// Connect the MySQL source described by `dsn`.
///
/// `database` overrides the database in the DSN path.
pub async fn build_source(
    dsn: &str,
    database: Option<&str>,
    cancel: &CancellationToken,
) -> SourceResult<ArcDynSource> {
    let source = MySqlSource::connect(dsn, database, cancel).await?;
    Ok(Arc::new(source))
}

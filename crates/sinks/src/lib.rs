//! Warehouse connectors.
//!
//! All warehouses implement the [`Warehouse`](rowsync_core::Warehouse)
//! trait from `rowsync_core`.
//!
//! # Available Warehouses
//!
//! - **BigQuery**: v2 REST API over `reqwest`, NDJSON append loads
//! - **Memory**: job-tracking fake used by the engine tests
//!
//! Requests that are safe to repeat (metadata reads, job polls, queries
//! carrying a request id) are retried with backoff on transient failures.
//! Table creation and load submission are sent once.
//!
//! ```ignore
//! use sinks::build_warehouse;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let warehouse = build_warehouse(&cfg.warehouse, cancel.clone())?;
//! let job = warehouse.submit_load("orders", payload).await?;
//! ```

use std::sync::Arc;

use rowsync_config::WarehouseCfg;
use rowsync_core::{ArcDynWarehouse, WarehouseResult};
use tokio_util::sync::CancellationToken;

pub mod bigquery;
pub mod mem;

pub use bigquery::BigQueryWarehouse;
pub use mem::{DeletedValue, MemWarehouse, SubmittedLoad};

/// Build the configured warehouse. Shares `cancel` with the sync run.
pub fn build_warehouse(
    cfg: &WarehouseCfg,
    cancel: CancellationToken,
) -> WarehouseResult<ArcDynWarehouse> {
    Ok(Arc::new(BigQueryWarehouse::new(cfg, cancel)?))
}

//! Shared utilities for rowsync connectors.
//!
//! - **DSN utilities**: building MySQL connection URLs from discrete
//!   settings and redacting credentials before they reach the logs
//! - **Retry logic**: exponential backoff with jitter, per-attempt
//!   timeouts and cancellation, used by both the source and the warehouse
//!   connectors for their transient failures
//!
//! ```ignore
//! use common::{RetryPolicy, redact_url_password, retry_async};
//!
//! info!(dsn = %redact_url_password(&dsn), "connecting");
//!
//! let conn = retry_async(
//!     |_attempt| async { pool.get_conn().await },
//!     |e| is_retryable_message(&e.to_string()),
//!     Duration::from_secs(30),
//!     RetryPolicy::default(),
//!     &cancel,
//!     "mysql_connect",
//! )
//! .await?;
//! ```

pub mod dsn;
pub mod retry;

pub use dsn::{
    DsnComponents, redact_token, redact_url_password,
};

pub use retry::{
    RetryOutcome, RetryPolicy, is_permanent_failure,
    is_retryable_message, retry_async, watchdog,
};

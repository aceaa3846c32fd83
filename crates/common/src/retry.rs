//! Retry with exponential backoff and jitter.
//!
//! Connector calls that cross the network (MySQL connects, BigQuery REST
//! requests) go through [`retry_async`]. The caller keeps its own error
//! type: the loop only needs a predicate saying which errors are
//! transient, and hands the last error back inside [`RetryOutcome`].
//!
//! ```ignore
//! let status = retry_async(
//!     |_| client.get_job(&job_id),
//!     WarehouseError::is_transient,
//!     Duration::from_secs(30),
//!     RetryPolicy::default(),
//!     &cancel,
//!     "bigquery_jobs_get",
//! )
//! .await
//! .map_err(|o| from_retry("jobs.get", o))?;
//! ```

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Retry Outcome
// =============================================================================

/// Why a retried operation ultimately failed.
#[derive(Debug)]
pub enum RetryOutcome<E> {
    /// The cancellation token fired, before an attempt or during backoff.
    Cancelled,

    /// The last attempt exceeded its per-attempt timeout.
    Timeout { action: Cow<'static, str> },

    /// `max_retries` was reached; carries the final error.
    Exhausted { attempts: u32, last_error: E },

    /// The predicate classified the error as permanent.
    Failed(E),
}

impl<E: Display> Display for RetryOutcome<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Timeout { action } => write!(f, "timeout: {action}"),
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "exhausted after {attempts} attempts: {last_error}"),
            Self::Failed(e) => write!(f, "non-retryable error: {e}"),
        }
    }
}

impl<E: Display + std::fmt::Debug> std::error::Error for RetryOutcome<E> {}

impl<E> RetryOutcome<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Exponential backoff policy with symmetric jitter.
///
/// Each call to [`next_backoff`](Self::next_backoff) returns the current
/// delay (jittered by up to `±jitter`) and doubles the internal delay,
/// capped at `max`.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// 0.0 to 1.0; 0.2 means the delay lands in 80%-120% of nominal.
    pub jitter: f64,
    /// `None` retries until cancelled.
    pub max_retries: Option<u32>,
    current_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.2, Some(5))
    }
}

impl RetryPolicy {
    pub fn new(
        initial: Duration,
        max: Duration,
        jitter: f64,
        max_retries: Option<u32>,
    ) -> Self {
        Self {
            initial,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            max_retries,
            current_backoff: initial,
        }
    }

    /// Nominal backoff for the next wait, advancing internal state.
    pub fn next_backoff(&mut self) -> Duration {
        let current = self.current_backoff;
        self.current_backoff = current.saturating_mul(2).min(self.max);

        if self.jitter > 0.0 {
            let factor =
                1.0 + rand::rng().random_range(-self.jitter..self.jitter);
            current.mul_f64(factor).max(Duration::from_nanos(1))
        } else {
            current
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt <= max)
    }
}

// =============================================================================
// Retry Loop
// =============================================================================

/// Run `op` until it succeeds, fails permanently, exhausts the policy or
/// is cancelled.
///
/// `op` receives the 1-indexed attempt number. Each attempt is bounded by
/// `attempt_timeout`; timeouts count as transient. Cancellation is checked
/// before every attempt and while sleeping between attempts.
pub async fn retry_async<T, E, Fut, Op, IsRetryable>(
    mut op: Op,
    is_retryable: IsRetryable,
    attempt_timeout: Duration,
    mut policy: RetryPolicy,
    cancel: &CancellationToken,
    label: &'static str,
) -> Result<T, RetryOutcome<E>>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut(u32) -> Fut,
    IsRetryable: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut last_error: Option<E> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryOutcome::Cancelled);
        }

        attempt += 1;
        if !policy.should_retry(attempt) {
            return Err(match last_error {
                Some(e) => RetryOutcome::Exhausted {
                    attempts: attempt - 1,
                    last_error: e,
                },
                None => RetryOutcome::Timeout {
                    action: Cow::Borrowed(label),
                },
            });
        }

        debug!(label, attempt, "starting attempt");

        let backoff = match timeout(attempt_timeout, op(attempt)).await {
            Ok(Ok(value)) => {
                if attempt > 1 {
                    debug!(label, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) if is_retryable(&e) => {
                let backoff = policy.next_backoff();
                warn!(
                    label,
                    attempt,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "retryable error, backing off"
                );
                last_error = Some(e);
                backoff
            }
            Ok(Err(e)) => {
                warn!(label, attempt, error = %e, "non-retryable error, giving up");
                return Err(RetryOutcome::Failed(e));
            }
            Err(_elapsed) => {
                let backoff = policy.next_backoff();
                warn!(
                    label,
                    attempt,
                    timeout_ms = attempt_timeout.as_millis() as u64,
                    backoff_ms = backoff.as_millis() as u64,
                    "attempt timed out, backing off"
                );
                backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryOutcome::Cancelled),
            _ = sleep(backoff) => {}
        }
    }
}

/// Single attempt bounded by a timeout and the cancellation token.
pub async fn watchdog<T, E, Fut>(
    op: Fut,
    timeout_duration: Duration,
    cancel: &CancellationToken,
    label: &'static str,
) -> Result<T, RetryOutcome<E>>
where
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(RetryOutcome::Cancelled),
        result = timeout(timeout_duration, op) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RetryOutcome::Failed(e)),
            Err(_) => Err(RetryOutcome::Timeout {
                action: Cow::Borrowed(label),
            }),
        },
    }
}

// =============================================================================
// Classification Helpers
// =============================================================================

/// Message-based fallback for opaque driver errors.
///
/// ```
/// use common::retry::is_retryable_message;
///
/// assert!(is_retryable_message("Connection reset by peer"));
/// assert!(is_retryable_message("operation timed out"));
/// assert!(!is_retryable_message("Access denied for user 'sync'"));
/// ```
pub fn is_retryable_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("eof")
        || lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("temporarily unavailable")
        || lower.contains("gone away")
        || lower.contains("lost connection")
}

/// Errors that will not go away by retrying (credentials, missing objects).
pub fn is_permanent_failure(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("access denied")
        || lower.contains("authentication")
        || lower.contains("unauthorized")
        || lower.contains("permission denied")
        || lower.contains("not found")
}

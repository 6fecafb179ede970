//! Readiness polling with a fixed interval.
//!
//! Every "wait until the remote side reports X" in the driver goes through
//! [`poll_for`] (or its boolean form [`poll_until`]). The check is re-issued on
//! every tick; nothing is cached between ticks. The first tick runs
//! immediately and there is no backoff growth.
//!
//! Outcomes of a single check:
//! - `Ok(Some(v))` / `Ok(true)`: condition holds, polling stops with success
//! - `Ok(None)` / `Ok(false)`: not yet, sleep one interval and retry
//! - `Err(e)` with [`Error::is_transient`]: logged and retried
//! - any other `Err(e)`: returned immediately
//!
//! A bounded policy turns an exhausted deadline into [`Error::Timeout`], also
//! when a check is still in flight at the deadline. Every
//! poll also watches a [`CancellationToken`] so callers can abandon the wait.
//!
//! # Example
//!
//! ```ignore
//! use lke_driver::poll::{poll_until, PollPolicy};
//!
//! poll_until(&PollPolicy::unbounded(interval), &cancel, "pool 7 to become ready", || async {
//!     Ok(api.get_node_pool(cluster_id, 7).await?.is_ready())
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::Error;

/// Interval and optional deadline of a poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Fixed time between checks
    pub interval: Duration,
    /// Deadline; `None` polls until the condition holds or a hard error occurs
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    /// Poll with a deadline
    pub fn bounded(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout: Some(timeout),
        }
    }

    /// Poll with no deadline
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }
}

/// Poll until `check` yields a value.
///
/// # Arguments
/// * `policy` - Interval and optional deadline
/// * `cancel` - Abandons the wait with [`Error::Cancelled`] when triggered
/// * `operation` - Name of the awaited condition, for logs and errors
/// * `check` - Issues the remote query; see the module docs for outcomes
pub async fn poll_for<T, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut check: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let started = Instant::now();
    let deadline = policy.timeout.map(|t| (started + t, t));
    let mut attempt = 0u32;
    let mut last_error: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation));
        }
        attempt += 1;

        // A check still in flight at the deadline is abandoned.
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            outcome = check() => outcome,
            _ = expired(deadline) => {
                let timeout = policy.timeout.unwrap_or_default();
                return Err(give_up(operation, timeout, attempt, last_error));
            }
        };

        match outcome {
            Ok(Some(value)) => {
                debug!(
                    operation = %operation,
                    attempt = attempt,
                    elapsed_ms = started.elapsed().as_millis(),
                    "condition met"
                );
                return Ok(value);
            }
            Ok(None) => {
                trace!(operation = %operation, attempt = attempt, "condition not yet met");
            }
            Err(e) if e.is_transient() => {
                debug!(
                    operation = %operation,
                    attempt = attempt,
                    error = %e,
                    "transient error while polling, retrying"
                );
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }

        let mut delay = policy.interval;
        if let Some((deadline, timeout)) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(give_up(operation, timeout, attempt, last_error));
            }
            delay = delay.min(deadline - now);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Resolves at the deadline; never for an unbounded poll
async fn expired(deadline: Option<(Instant, Duration)>) {
    match deadline {
        Some((at, _)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn give_up(operation: &str, timeout: Duration, attempt: u32, last_error: Option<String>) -> Error {
    warn!(
        operation = %operation,
        attempt = attempt,
        timeout_secs = timeout.as_secs(),
        "gave up waiting"
    );
    Error::timeout(operation, timeout, last_error)
}

/// Poll until `check` returns `Ok(true)`.
///
/// Boolean form of [`poll_for`] for conditions that carry no value.
pub async fn poll_until<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut check: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    poll_for(policy, cancel, operation, || {
        let fut = check();
        async move { fut.await.map(|done| done.then_some(())) }
    })
    .await
}

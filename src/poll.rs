//! Bounded retry loop around a boolean-producing check.
//!
//! Attempts run back to back with a fixed pause between them. Every attempt runs under
//! the loop's deadline: one still in flight when the deadline passes is dropped and the
//! loop reports [`Error::Timeout`].

use crate::error::{Error, Result};
use crate::metrics::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub(crate) fn pause(&self) -> Duration {
        self.interval.max(MIN_POLL_INTERVAL)
    }
}

/// Polls `predicate` until it yields `true` or `config.timeout` elapses.
pub async fn execute<F, Fut>(operation: &str, config: PollConfig, mut predicate: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let never = CancellationToken::new();
    execute_with_context(&never, operation, config, || {
        let attempt = predicate();
        async move { Ok(attempt.await) }
    })
    .await
}

/// Like [`execute`], but the predicate may fail; the first error aborts the loop and is
/// returned as-is. Cancelling `shutdown` stops the loop with [`Error::Cancelled`].
pub async fn execute_with_context<F, Fut>(
    shutdown: &CancellationToken,
    operation: &str,
    config: PollConfig,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let deadline = started + config.timeout;
    let counters = metrics();
    let mut attempt: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            return Err(Error::Cancelled);
        }
        attempt += 1;
        counters.record_poll_attempt();
        let satisfied = match timeout_at(deadline, predicate()).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                tracing::debug!(operation, attempt, "attempt still running at deadline");
                return Err(timed_out(operation, started.elapsed(), attempt));
            }
        };
        let now = Instant::now();

        if satisfied {
            tracing::debug!(operation, attempt, "poll condition satisfied");
            return Ok(());
        }
        if now >= deadline {
            return Err(timed_out(operation, started.elapsed(), attempt));
        }

        tracing::trace!(operation, attempt, "poll condition not yet satisfied");
        if sleep_or_cancel(config.pause(), shutdown).await {
            return Err(Error::Cancelled);
        }
        if Instant::now() > deadline {
            return Err(timed_out(operation, started.elapsed(), attempt));
        }
    }
}

fn timed_out(operation: &str, waited: Duration, attempts: u32) -> Error {
    metrics().record_poll_timeout();
    tracing::debug!(operation, attempts, "poll deadline exceeded");
    Error::timeout(operation, waited)
}

/// Returns `true` when `shutdown` fired before the pause elapsed.
async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

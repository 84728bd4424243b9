//! Connection authentication with fixed backoff

use std::time::Duration;

use crate::backends::DatabasePool;
use crate::error::{ModelError, OrmResult};

/// Default number of retries after the first failed attempt
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default wait between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(20);

/// Retry policy for [`authenticate`].
///
/// `max_attempts` counts retries, so up to `max_attempts + 1` liveness
/// checks are made. The wait is fixed, not exponential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    /// Single try, no waiting
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

/// Verify the pool can reach the database.
///
/// Returns as soon as a liveness check succeeds. Each failure is logged and
/// followed by a `policy.backoff` wait; once `policy.max_attempts` retries
/// have failed the last failure is returned as [`ModelError::Connection`].
pub async fn authenticate(pool: &dyn DatabasePool, policy: &RetryPolicy) -> OrmResult<()> {
    let mut attempt: u32 = 1;

    loop {
        let err = match pool.health_check().await {
            Ok(latency) => {
                tracing::debug!(attempt, latency_ms = latency.as_millis() as u64, "Database connection verified");
                return Ok(());
            }
            Err(err) => err,
        };

        if attempt > policy.max_attempts {
            tracing::error!(
                attempt,
                max_attempts = policy.max_attempts,
                error = %err,
                "Giving up on connecting to the database"
            );
            return Err(into_connection_error(err, attempt));
        }

        tracing::warn!(
            attempt,
            max_attempts = policy.max_attempts,
            backoff_ms = policy.backoff.as_millis() as u64,
            error = %err,
            "Could not connect to the database, retrying in {}s",
            policy.backoff.as_secs()
        );

        tokio::time::sleep(policy.backoff).await;
        attempt += 1;
    }
}

fn into_connection_error(err: ModelError, attempts: u32) -> ModelError {
    let cause = match err {
        ModelError::Connection(msg) => msg,
        other => other.to_string(),
    };
    ModelError::Connection(format!("{} (after {} attempts)", cause, attempts))
}

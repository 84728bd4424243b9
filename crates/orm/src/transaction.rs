//! Transaction Management
//!
//! Runs a unit of work inside a transaction and retries the whole unit when
//! the database aborts it to break a lock cycle. The unit of work may run
//! more than once and must tolerate that.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::backends::{DatabasePool, DatabaseTransaction};
use crate::error::{ModelError, OrmResult};

/// Boxed future returned by a unit of work
pub type TransactionFuture<'t, T> = Pin<Box<dyn Future<Output = OrmResult<T>> + Send + 't>>;

/// Decides whether a failure is transient lock contention worth retrying
pub type RetryPredicate = Arc<dyn Fn(&ModelError) -> bool + Send + Sync>;

/// Markers MySQL uses for a transaction aborted by deadlock detection
const DEADLOCK_MARKERS: [&str; 2] = ["ER_LOCK_DEADLOCK", "Deadlock found"];

/// Default retry predicate: the failure text carries a MySQL deadlock marker
pub fn is_lock_deadlock(err: &ModelError) -> bool {
    let message = err.to_string();
    DEADLOCK_MARKERS.iter().any(|marker| message.contains(marker))
}

/// Retry behaviour of [`with_transaction`]
#[derive(Clone)]
pub struct TransactionOptions {
    /// Lower bound of the randomised wait before a retry
    pub min_delay: Duration,
    /// Upper bound of the randomised wait before a retry
    pub max_delay: Duration,
    is_retryable: RetryPredicate,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            is_retryable: Arc::new(is_lock_deadlock),
        }
    }
}

impl fmt::Debug for TransactionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOptions")
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay_range(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// Replace the lock-failure predicate
    pub fn with_retry_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&ModelError) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Arc::new(predicate);
        self
    }

    pub fn is_retryable(&self, err: &ModelError) -> bool {
        (self.is_retryable)(err)
    }

    /// Uniform draw from `[min_delay, max_delay]`
    pub fn retry_delay(&self) -> Duration {
        if self.min_delay >= self.max_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Run `work` inside a transaction, committing on success.
///
/// Failures the options classify as lock contention (including ones raised
/// at commit) roll back, wait a random delay and rerun `work` in a fresh
/// transaction, without limit. Any other failure is rolled back and
/// returned unchanged.
///
/// ```ignore
/// let count = with_transaction(pool, &TransactionOptions::default(), |tx| {
///     Box::pin(async move {
///         tx.execute("UPDATE stock SET qty = qty - 1 WHERE id = ?", &[7.into()]).await
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F>(pool: &dyn DatabasePool, options: &TransactionOptions, work: F) -> OrmResult<T>
where
    T: Send,
    F: for<'t> Fn(&'t mut dyn DatabaseTransaction) -> TransactionFuture<'t, T> + Send + Sync,
{
    let mut retries: u32 = 0;

    loop {
        let err = match run_once(pool, &work).await {
            Ok(value) => {
                if retries > 0 {
                    debug!(retries, "Transaction committed after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !options.is_retryable(&err) {
            return Err(err);
        }

        retries = retries.saturating_add(1);
        let delay = options.retry_delay();
        warn!(
            retry = retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transaction hit a lock conflict, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

async fn run_once<T, F>(pool: &dyn DatabasePool, work: &F) -> OrmResult<T>
where
    T: Send,
    F: for<'t> Fn(&'t mut dyn DatabaseTransaction) -> TransactionFuture<'t, T> + Send + Sync,
{
    let mut tx = pool.begin_transaction().await?;

    match work(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                debug!(error = %rollback_err, "Rollback after failed unit of work also failed");
            }
            Err(err)
        }
    }
}

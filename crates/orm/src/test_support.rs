//! Scripted in-memory pool used by the unit tests.
//!
//! Every statement that reaches the pool, a connection or a transaction is
//! appended to one shared log. Failures and result rows are matched by SQL
//! substring.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backends::{
    DatabaseConnection, DatabasePool, DatabasePoolStats, DatabaseRow, DatabaseTransaction, DatabaseValue, ValueRow,
};
use crate::error::{ModelError, OrmResult};

struct ScriptedFailure {
    pattern: String,
    error: ModelError,
    remaining: Option<usize>,
}

#[derive(Default)]
struct MockState {
    log: Vec<String>,
    failures: Vec<ScriptedFailure>,
    responses: Vec<(String, Vec<ValueRow>)>,
    health_failures: usize,
    health_checks: usize,
    begin_failures: usize,
    closed: bool,
    close_fails: bool,
    released: usize,
    discarded: usize,
}

impl MockState {
    fn run(&mut self, sql: &str) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.log.push(sql.to_string());

        if let Some(failure) = self.failures.iter_mut().find(|f| {
            sql.contains(&f.pattern) && f.remaining.map_or(true, |remaining| remaining > 0)
        }) {
            if let Some(remaining) = failure.remaining.as_mut() {
                *remaining -= 1;
            }
            return Err(failure.error.clone());
        }

        Ok(self
            .responses
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, rows)| rows.iter().cloned().map(ValueRow::into_boxed).collect())
            .unwrap_or_default())
    }
}

/// Scripted pool; clones share state
#[derive(Clone, Default)]
pub(crate) struct MockPool {
    state: Arc<Mutex<MockState>>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Fail statements containing `pattern` every time
    pub fn fail_always(&self, pattern: &str, error: ModelError) -> &Self {
        self.state().failures.push(ScriptedFailure {
            pattern: pattern.to_string(),
            error,
            remaining: None,
        });
        self
    }

    /// Fail statements containing `pattern` the next `times` times
    pub fn fail_times(&self, pattern: &str, times: usize, error: ModelError) -> &Self {
        self.state().failures.push(ScriptedFailure {
            pattern: pattern.to_string(),
            error,
            remaining: Some(times),
        });
        self
    }

    /// Return `rows` for queries containing `pattern`
    pub fn respond(&self, pattern: &str, rows: Vec<ValueRow>) -> &Self {
        self.state().responses.push((pattern.to_string(), rows));
        self
    }

    /// Fail the next `times` health checks
    pub fn fail_health_checks(&self, times: usize) -> &Self {
        self.state().health_failures = times;
        self
    }

    /// Fail the next `times` attempts to open a transaction
    pub fn fail_begins(&self, times: usize) -> &Self {
        self.state().begin_failures = times;
        self
    }

    /// Make `close` on the pool fail
    pub fn fail_close(&self) -> &Self {
        self.state().close_fails = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.state().log.iter().filter(|entry| entry.as_str() == sql).count()
    }

    pub fn health_checks(&self) -> usize {
        self.state().health_checks
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Connections handed back to the pool
    pub fn released(&self) -> usize {
        self.state().released
    }

    /// Connections closed instead of handed back
    pub fn discarded(&self) -> usize {
        self.state().discarded
    }

    pub fn as_pool(&self) -> Arc<dyn DatabasePool> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl DatabasePool for MockPool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        Ok(Box::new(MockConnection { pool: self.clone() }))
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let mut state = self.state();
        if state.begin_failures > 0 {
            state.begin_failures -= 1;
            return Err(ModelError::Connection("connect ECONNREFUSED 127.0.0.1:3306".to_string()));
        }
        state.log.push("BEGIN".to_string());
        Ok(Box::new(MockTransaction { pool: self.clone() }))
    }

    async fn execute(&self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
        self.state().run(sql).map(|rows| rows.len() as u64)
    }

    async fn fetch_all(&self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.state().run(sql)
    }

    async fn close(&self) -> OrmResult<()> {
        let mut state = self.state();
        state.closed = true;
        if state.close_fails {
            return Err(ModelError::Connection("pool already shut down".to_string()));
        }
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        DatabasePoolStats::default()
    }

    async fn health_check(&self) -> OrmResult<Duration> {
        let mut state = self.state();
        state.health_checks += 1;
        if state.health_failures > 0 {
            state.health_failures -= 1;
            return Err(ModelError::Connection("connect ECONNREFUSED 127.0.0.1:3306".to_string()));
        }
        Ok(Duration::from_millis(1))
    }
}

pub(crate) struct MockConnection {
    pool: MockPool,
}

#[async_trait]
impl DatabaseConnection for MockConnection {
    async fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
        self.pool.state().run(sql).map(|rows| rows.len() as u64)
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.pool.state().run(sql)
    }

    async fn close(self: Box<Self>) -> OrmResult<()> {
        self.pool.state().released += 1;
        Ok(())
    }

    async fn discard(self: Box<Self>) -> OrmResult<()> {
        self.pool.state().discarded += 1;
        Ok(())
    }
}

pub(crate) struct MockTransaction {
    pool: MockPool,
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    async fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
        self.pool.state().run(sql).map(|rows| rows.len() as u64)
    }

    async fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        self.pool.state().run(sql)
    }

    async fn commit(self: Box<Self>) -> OrmResult<()> {
        self.pool.state().run("COMMIT").map(|_| ())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        self.pool.state().run("ROLLBACK").map(|_| ())
    }
}

pub(crate) fn deadlock() -> ModelError {
    ModelError::Database(
        "ER_LOCK_DEADLOCK: Deadlock found when trying to get lock; try restarting transaction".to_string(),
    )
}

//! MySQL Backend Implementation
//!
//! MySQL-specific implementation of the backend traits using sqlx. Server
//! errors keep their symbolic code (`ER_LOCK_DEADLOCK: ...`) in the message
//! so marker-based failure predicates can recognise them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use holdfast_core::DatabaseConfig;
use serde_json::Value as JsonValue;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow,
    MySqlSslMode,
};
use sqlx::{Column, ConnectOptions, Row as SqlxRow, TypeInfo, ValueRef};

use super::core::*;
use crate::error::{OrmError, OrmResult};

type MySqlQuery<'q> = sqlx::query::Query<'q, MySql, MySqlArguments>;

/// MySQL database backend implementation
#[derive(Debug, Default)]
pub struct MySqlBackend;

impl MySqlBackend {
    /// Create a new MySQL backend instance
    pub fn new() -> Self {
        Self
    }

    /// Connect options for the given configuration and scope
    pub fn connect_options(config: &DatabaseConfig, scope: ConnectionScope) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .charset("utf8mb4")
            .ssl_mode(if config.ssl { MySqlSslMode::Required } else { MySqlSslMode::Disabled });

        if !config.pass.is_empty() {
            options = options.password(&config.pass);
        }

        if scope == ConnectionScope::Database {
            options = options.database(&config.name);
        }

        if !config.verbose {
            options = options.disable_statement_logging();
        }

        options
    }
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    async fn create_pool(
        &self,
        config: &DatabaseConfig,
        scope: ConnectionScope,
        pool_config: &DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>> {
        let mut options = MySqlPoolOptions::new()
            .max_connections(pool_config.max_connections)
            .min_connections(pool_config.min_connections)
            .acquire_timeout(Duration::from_secs(pool_config.acquire_timeout_seconds))
            .test_before_acquire(pool_config.test_before_acquire);

        if let Some(idle_timeout) = pool_config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = pool_config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        tracing::debug!(
            endpoint = %config.endpoint(),
            database = %config.name,
            ?scope,
            "Creating MySQL pool"
        );

        let pool = options.connect_lazy_with(Self::connect_options(config, scope));
        Ok(Arc::new(MySqlDatabasePool::new(pool)))
    }

    fn name(&self) -> &'static str {
        "mysql"
    }
}

/// MySQL connection pool implementation
pub struct MySqlDatabasePool {
    pool: MySqlPool,
}

impl MySqlDatabasePool {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Get the underlying sqlx pool
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for MySqlDatabasePool {
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>> {
        let conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Box::new(MySqlDatabaseConnection { conn }))
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", map_sqlx_error(e))))?;
        Ok(Box::new(MySqlDatabaseTransaction { tx: Some(tx) }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(box_rows(rows))
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn stats(&self) -> DatabasePoolStats {
        let total = self.pool.size();
        let idle = self.pool.num_idle() as u32;

        DatabasePoolStats {
            total_connections: total,
            idle_connections: idle,
            active_connections: total.saturating_sub(idle),
        }
    }

    async fn health_check(&self) -> OrmResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::Connection(format!("Health check failed: {}", map_sqlx_error(e))))?;

        Ok(start.elapsed())
    }
}

/// MySQL connection implementation
pub struct MySqlDatabaseConnection {
    conn: sqlx::pool::PoolConnection<MySql>,
}

#[async_trait]
impl DatabaseConnection for MySqlDatabaseConnection {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut *self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(box_rows(rows))
    }

    async fn close(self: Box<Self>) -> OrmResult<()> {
        // Dropping the PoolConnection returns it to the pool
        drop(self.conn);
        Ok(())
    }

    async fn discard(self: Box<Self>) -> OrmResult<()> {
        self.conn.close().await.map_err(map_sqlx_error)
    }
}

/// MySQL transaction implementation
pub struct MySqlDatabaseTransaction {
    tx: Option<sqlx::Transaction<'static, MySql>>,
}

impl MySqlDatabaseTransaction {
    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, MySql>> {
        self.tx
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for MySqlDatabaseTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let tx = self.active()?;
        let result = bind_all(sqlx::query(sql), params)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let tx = self.active()?;
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(box_rows(rows))
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        // A deadlock can surface at commit time; keep the server error intact
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", map_sqlx_error(e))))
    }
}

/// MySQL row implementation
pub struct MySqlDatabaseRow {
    row: MySqlRow,
}

impl DatabaseRow for MySqlDatabaseRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        mysql_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = column_index(&self.column_names(), name)?;
        mysql_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn box_rows(rows: Vec<MySqlRow>) -> Vec<Box<dyn DatabaseRow>> {
    rows.into_iter()
        .map(|row| Box::new(MySqlDatabaseRow { row }) as Box<dyn DatabaseRow>)
        .collect()
}

fn bind_all<'q>(mut query: MySqlQuery<'q>, params: &[DatabaseValue]) -> MySqlQuery<'q> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: MySqlQuery<'q>, value: &DatabaseValue) -> MySqlQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Json(j) => query.bind(sqlx::types::Json(j.clone())),
    }
}

/// Convert a MySQL column value to DatabaseValue
fn mysql_value_to_database_value(row: &MySqlRow, index: usize) -> OrmResult<DatabaseValue> {
    let decode_error = |e: sqlx::Error| OrmError::Database(format!("Failed to decode column {}: {}", index, e));

    let raw = row.try_get_raw(index).map_err(decode_error)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_uppercase();

    let value = match type_name.as_str() {
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index).map_err(decode_error)?),
        name if name.contains("INT") && name.ends_with("UNSIGNED") => {
            let value: u64 = row.try_get_unchecked(index).map_err(decode_error)?;
            DatabaseValue::Int64(value as i64)
        }
        name if name.contains("INT") => {
            let value: i64 = row.try_get_unchecked(index).map_err(decode_error)?;
            DatabaseValue::Int64(value)
        }
        "FLOAT" => {
            let value: f32 = row.try_get(index).map_err(decode_error)?;
            DatabaseValue::Float64(value as f64)
        }
        "DOUBLE" => DatabaseValue::Float64(row.try_get(index).map_err(decode_error)?),
        "DATETIME" | "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get_unchecked(index).map_err(decode_error)?;
            DatabaseValue::DateTime(chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc))
        }
        "JSON" => {
            let value: sqlx::types::Json<JsonValue> = row.try_get(index).map_err(decode_error)?;
            DatabaseValue::Json(value.0)
        }
        name if name.contains("BLOB") || name.contains("BINARY") => {
            DatabaseValue::Bytes(row.try_get_unchecked(index).map_err(decode_error)?)
        }
        _ => {
            // DECIMAL, DATE, TIME, text types and anything else travel as text
            let value: String = row.try_get_unchecked(index).map_err(decode_error)?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}

/// Map a sqlx error onto the runtime error taxonomy
pub fn map_sqlx_error(err: sqlx::Error) -> OrmError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.try_downcast_ref::<MySqlDatabaseError>() {
            Some(mysql_err) => OrmError::Database(format!(
                "{}: {}",
                mysql_error_code(mysql_err.number()),
                mysql_err.message()
            )),
            None => OrmError::Database(db_err.to_string()),
        },
        err @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => OrmError::Connection(err.to_string()),
        other => OrmError::Database(other.to_string()),
    }
}

/// Symbolic name for the MySQL server error numbers the runtime cares about
pub fn mysql_error_code(number: u16) -> String {
    match number {
        1045 => "ER_ACCESS_DENIED_ERROR".to_string(),
        1049 => "ER_BAD_DB_ERROR".to_string(),
        1062 => "ER_DUP_ENTRY".to_string(),
        1146 => "ER_NO_SUCH_TABLE".to_string(),
        1205 => "ER_LOCK_WAIT_TIMEOUT".to_string(),
        1213 => "ER_LOCK_DEADLOCK".to_string(),
        other => format!("ER_{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(mysql_error_code(1213), "ER_LOCK_DEADLOCK");
        assert_eq!(mysql_error_code(1146), "ER_NO_SUCH_TABLE");
        assert_eq!(mysql_error_code(9999), "ER_9999");
    }

    #[test]
    fn test_pool_errors_become_connection_errors() {
        assert!(matches!(map_sqlx_error(sqlx::Error::PoolTimedOut), OrmError::Connection(_)));
        assert!(matches!(map_sqlx_error(sqlx::Error::RowNotFound), OrmError::Database(_)));
    }

    #[test]
    fn test_connect_options_scope() {
        let config = DatabaseConfig::local("orders_test");
        // Building options must not panic for either scope or with an empty password
        let _ = MySqlBackend::connect_options(&config, ConnectionScope::Database);
        let _ = MySqlBackend::connect_options(&config.clone().with_ssl(true), ConnectionScope::Server);
    }
}

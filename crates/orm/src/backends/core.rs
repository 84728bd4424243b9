//! Core Database Backend Traits
//!
//! The runtime only talks to the database through these traits, so the
//! retry loops and the safety gate are independent of the driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use holdfast_core::DatabaseConfig;
use serde_json::Value as JsonValue;

use crate::error::{ModelError, OrmResult};

/// Single checked-out connection.
///
/// Session state (`SET FOREIGN_KEY_CHECKS`, `SET sql_mode`) is per
/// connection, so ordered statement sequences must run on one of these.
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute a statement and return affected rows count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return the result rows
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Return the connection to its pool
    async fn close(self: Box<Self>) -> OrmResult<()>;

    /// Close the underlying connection instead of returning it, for
    /// connections whose session state could not be restored
    async fn discard(self: Box<Self>) -> OrmResult<()>;
}

/// Open transaction handed to a unit of work
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Abstract database connection pool, safe for concurrent use
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Acquire a connection from the pool
    async fn acquire(&self) -> OrmResult<Box<dyn DatabaseConnection>>;

    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement directly on the pool
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows directly on the pool
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// Get pool statistics
    fn stats(&self) -> DatabasePoolStats;

    /// Liveness check; returns the round-trip time
    async fn health_check(&self) -> OrmResult<Duration>;
}

/// Database pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabasePoolStats {
    pub total_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to JSON value
    fn to_json(&self) -> OrmResult<JsonValue> {
        let mut map = serde_json::Map::new();
        for (index, name) in self.column_names().into_iter().enumerate() {
            map.insert(name, self.get_by_index(index)?.to_json());
        }
        Ok(JsonValue::Object(map))
    }
}

/// Typed column access on top of [`DatabaseRow`]
pub trait DatabaseRowExt {
    /// Get a typed value from a column
    fn get<T>(&self, column: &str) -> OrmResult<T>
    where
        T: for<'de> serde::Deserialize<'de>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get<T>(&self, column: &str) -> OrmResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let value = self.get_by_name(column)?;
        serde_json::from_value(value.to_json())
            .map_err(|e| ModelError::Database(format!("Failed to deserialize column '{}': {}", column, e)))
    }
}

/// Database value enumeration for parameter binding and row decoding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    DateTime(chrono::DateTime<chrono::Utc>),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view, when the value is numeric or a numeric string
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            DatabaseValue::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Text view; binary strings (as returned for some `information_schema`
    /// columns) are decoded lossily
    pub fn as_string(&self) -> Option<String> {
        match self {
            DatabaseValue::String(s) => Some(s.clone()),
            DatabaseValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            DatabaseValue::Int32(i) => Some(i.to_string()),
            DatabaseValue::Int64(i) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// What a pool connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionScope {
    /// The database named in the configuration
    Database,
    /// The server only, no default database (needed for `CREATE DATABASE`)
    Server,
}

/// Database backend trait that provides driver-specific pools
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a connection pool. Pools connect lazily; use
    /// [`crate::connection::authenticate`] to verify liveness.
    async fn create_pool(
        &self,
        config: &DatabaseConfig,
        scope: ConnectionScope,
        pool_config: &DatabasePoolConfig,
    ) -> OrmResult<Arc<dyn DatabasePool>>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

impl DatabasePoolConfig {
    /// Single-connection pool for one-off administrative statements
    pub fn single() -> Self {
        Self {
            max_connections: 1,
            min_connections: 0,
            ..Self::default()
        }
    }
}

/// Column lookup helper shared by row implementations
pub(crate) fn column_index(names: &[String], name: &str) -> OrmResult<usize> {
    names
        .iter()
        .position(|column| column.eq_ignore_ascii_case(name))
        .ok_or_else(|| ModelError::Database(format!("Column '{}' not found", name)))
}

/// Simple owned row, used for rows built in memory
#[derive(Debug, Clone, Default)]
pub struct ValueRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl ValueRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    pub fn into_boxed(self) -> Box<dyn DatabaseRow> {
        Box::new(self)
    }
}

impl DatabaseRow for ValueRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| ModelError::Database(format!("Column index {} out of range", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = column_index(&self.columns, name)?;
        self.get_by_index(index)
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }
}

/// Collect rows into string-keyed maps, mostly for diagnostics and the CLI
pub fn rows_to_maps(rows: &[Box<dyn DatabaseRow>]) -> OrmResult<Vec<HashMap<String, JsonValue>>> {
    rows.iter()
        .map(|row| {
            let names = row.column_names();
            names
                .into_iter()
                .enumerate()
                .map(|(index, name)| Ok((name, row.get_by_index(index)?.to_json())))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_views() {
        assert_eq!(DatabaseValue::Int32(7).as_i64(), Some(7));
        assert_eq!(DatabaseValue::String(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(DatabaseValue::Null.as_i64(), None);
        assert_eq!(DatabaseValue::Bytes(b"users".to_vec()).as_string().as_deref(), Some("users"));
        assert_eq!(DatabaseValue::from(None::<i64>), DatabaseValue::Null);
    }

    #[test]
    fn test_value_row_lookup_is_case_insensitive() {
        let row = ValueRow::new().with("TABLE_NAME", "users").with("rows", 3i64);
        assert_eq!(row.get_by_name("table_name").unwrap(), DatabaseValue::String("users".into()));
        let count: i64 = row.get("rows").unwrap();
        assert_eq!(count, 3);
        assert!(row.get_by_name("missing").is_err());

        let json = row.to_json().unwrap();
        assert_eq!(json["TABLE_NAME"], "users");
    }

    #[test]
    fn test_rows_to_maps() {
        let rows = vec![ValueRow::new().with("id", 1).into_boxed()];
        let maps = rows_to_maps(&rows).unwrap();
        assert_eq!(maps[0]["id"], 1);
    }
}

//! # holdfast-orm: Resilient Database Access Runtime
//!
//! A safety layer between application code and a MySQL database:
//!
//! - an immutable model registry that still resolves deprecated names,
//!   warning once per alias
//! - connection authentication with bounded fixed-backoff retries
//! - an advisory migration drift check
//! - a transaction executor that reruns units of work aborted by deadlocks
//! - a safety gate that keeps destructive test helpers away from anything
//!   but a disposable local test database

pub mod backends;
pub mod connection;
pub mod database;
pub mod error;
pub mod migrations;
pub mod registry;
pub mod testing;
pub mod transaction;

#[cfg(test)]
mod test_support;

// Re-export core traits and types
pub use backends::{
    ConnectionScope, DatabaseBackend, DatabaseConnection, DatabasePool, DatabasePoolConfig, DatabaseRow,
    DatabaseRowExt, DatabaseTransaction, DatabaseValue, MySqlBackend,
};
pub use connection::{authenticate, RetryPolicy};
pub use database::{Database, DatabaseOptions};
pub use error::{ModelError, ModelResult, OrmError, OrmResult, UnsafeTargetError};
pub use migrations::{check_drift, DriftReport, DriftStatus, MigrationSource, MigrationTarget, MigrationVersionPair};
pub use registry::{Entity, FieldDefinition, FieldType, Model, ModelHandle, ModelRegistry};
pub use testing::{NameMarker, TestDatabaseGuard, TestDatabaseRules};
pub use transaction::{is_lock_deadlock, with_transaction, TransactionFuture, TransactionOptions};

pub use holdfast_core::DatabaseConfig;

//! Error types for the runtime
//!
//! Connection and deadlock transience is absorbed by the retry loops; every
//! other failure surfaces as a [`ModelError`] unchanged.

use std::fmt;

use holdfast_core::ConfigError;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for runtime operations
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Two entities (or an entity and an alias) share a name
    DuplicateName(String),
    /// Attempted to add, replace or remove a model on a built registry
    ImmutableRegistry(String),
    /// Connection could not be established, retries exhausted
    Connection(String),
    /// Transaction could not be opened, committed or rolled back
    Transaction(String),
    /// Statement failed on the server
    Database(String),
    /// Destructive operation aimed at something that is not a test database
    UnsafeTarget(String),
    /// Migration error
    Migration(String),
    /// Relationship wiring failed
    Relationship(String),
    /// Configuration error
    Configuration(String),
    /// Runtime used before `initialize`
    NotInitialized,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::DuplicateName(name) => write!(f, "Duplicate model name: '{}'", name),
            ModelError::ImmutableRegistry(msg) => write!(f, "Database models are immutable: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            ModelError::Database(msg) => write!(f, "{}", msg),
            ModelError::UnsafeTarget(msg) => write!(f, "Unsafe target: {}", msg),
            ModelError::Migration(msg) => write!(f, "Migration error: {}", msg),
            ModelError::Relationship(msg) => write!(f, "Relationship error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            ModelError::NotInitialized => write!(f, "Database has not been initialised; call initialize() first"),
        }
    }
}

impl std::error::Error for ModelError {}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Database(format!("Failed to decode value: {}", err))
    }
}

/// Rejection from the test-database guard.
///
/// Both variants carry the redacted configuration so it can be printed
/// before the process halts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UnsafeTargetError {
    #[error("The database you are trying to connect to is not a test database! There is a high risk of data loss if you run destructive operations against an internal or production database. Please check your database config:\n{config}")]
    Endpoint { config: String },

    #[error("Cannot use database with name: \"{name}\" for testing. The database name must {requirement}.")]
    Name {
        name: String,
        requirement: String,
        config: String,
    },
}

impl UnsafeTargetError {
    /// Redacted configuration that was rejected
    pub fn config(&self) -> &str {
        match self {
            UnsafeTargetError::Endpoint { config } => config,
            UnsafeTargetError::Name { config, .. } => config,
        }
    }
}

impl From<UnsafeTargetError> for ModelError {
    fn from(err: UnsafeTargetError) -> Self {
        ModelError::UnsafeTarget(err.to_string())
    }
}

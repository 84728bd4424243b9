//! Migration System
//!
//! Versioned SQL migrations read from a directory, a runner that moves the
//! database to a target version, and the advisory drift check run at start-up.

pub mod definitions;
pub mod drift;
pub mod manager;
pub mod runner;

pub use definitions::{
    Migration, MigrationConfig, MigrationDirection, MigrationRunResult, MigrationSource, MigrationTarget,
    SCHEMA_VERSION_TABLE,
};
pub use drift::{check_drift, DriftReport, DriftStatus, MigrationVersionPair};
pub use manager::{split_sql_statements, MigrationManager};
pub use runner::MigrationRunner;

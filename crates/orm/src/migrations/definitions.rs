//! Migration Definitions - Core types shared by the migration system

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{OrmError, OrmResult};

/// Bookkeeping table recording applied versions
pub const SCHEMA_VERSION_TABLE: &str = "schemaversion";

/// One versioned migration assembled from its `do`/`undo` files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    /// File name of the `do` script
    pub filename: String,
    pub up_sql: String,
    /// Contents of the `undo` script, when one exists
    pub down_sql: Option<String>,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory holding `<version>.do.<name>.sql` and `<version>.undo.<name>.sql` files
    pub migrations_dir: PathBuf,
    /// Table name for tracking applied versions
    pub schema_table: String,
    /// Report each file as it runs
    pub verbose: bool,
}

impl MigrationConfig {
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            schema_table: SCHEMA_VERSION_TABLE.to_string(),
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Version to migrate to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationTarget {
    /// Highest version available on disk
    #[default]
    Max,
    /// Exact version; 0 reverts everything
    Version(i64),
}

impl FromStr for MigrationTarget {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("max") {
            return Ok(MigrationTarget::Max);
        }
        trimmed
            .parse::<i64>()
            .ok()
            .filter(|version| *version >= 0)
            .map(MigrationTarget::Version)
            .ok_or_else(|| OrmError::Migration(format!("Invalid migration target '{}'", s)))
    }
}

impl fmt::Display for MigrationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationTarget::Max => f.write_str("max"),
            MigrationTarget::Version(version) => write!(f, "{}", version),
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationDirection {
    /// Run `do` scripts
    Up,
    /// Run `undo` scripts
    Down,
}

/// Result of a `migrate_to` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRunResult {
    pub from_version: i64,
    pub to_version: i64,
    pub direction: Option<MigrationDirection>,
    /// Versions run, in execution order
    pub executed: Vec<i64>,
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

/// Anything that can report and move the schema version of a database
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// Highest version available
    async fn max_version(&self) -> OrmResult<i64>;

    /// Highest version recorded as applied in the database
    async fn applied_version(&self) -> OrmResult<i64>;

    /// Run or revert migrations until the database is at `target`
    async fn migrate_to(&self, target: MigrationTarget) -> OrmResult<MigrationRunResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!("max".parse::<MigrationTarget>().unwrap(), MigrationTarget::Max);
        assert_eq!("MAX".parse::<MigrationTarget>().unwrap(), MigrationTarget::Max);
        assert_eq!("007".parse::<MigrationTarget>().unwrap(), MigrationTarget::Version(7));
        assert_eq!("0".parse::<MigrationTarget>().unwrap(), MigrationTarget::Version(0));
        assert!("-1".parse::<MigrationTarget>().is_err());
        assert!("latest".parse::<MigrationTarget>().is_err());
        assert_eq!(MigrationTarget::default().to_string(), "max");
    }
}

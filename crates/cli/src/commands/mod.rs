pub mod check;
pub mod migrate;
pub mod query;
pub mod test_db;

use std::env;
use std::path::PathBuf;

use anyhow::Context;
use holdfast_core::DatabaseConfig;
use holdfast_orm::{Database, DatabaseOptions};

/// Environment variable naming the migrations directory
pub const MIGRATIONS_ENV: &str = "HOLDFAST_MIGRATIONS";

const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Global flags shared by every command
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    pub config_file: Option<PathBuf>,
    pub migrations_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl CommandContext {
    /// Configuration from `--config`, otherwise from `DB_*` variables
    pub fn database_config(&self) -> anyhow::Result<DatabaseConfig> {
        let config = match &self.config_file {
            Some(path) => DatabaseConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load database config from {}", path.display()))?,
            None => DatabaseConfig::from_env().context("Failed to load database config from the environment")?,
        };
        Ok(if self.verbose { config.with_verbose(true) } else { config })
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.migrations_dir
            .clone()
            .or_else(|| env::var_os(MIGRATIONS_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR))
    }

    /// Runtime without any registered entities; commands only need the
    /// connection, the migrations and the test-database helpers
    pub fn database(&self) -> anyhow::Result<Database> {
        let options = DatabaseOptions::new(self.migrations_dir())?;
        Ok(Database::new(options))
    }

    /// Initialised runtime for the configured database
    pub async fn connect(&self) -> anyhow::Result<(Database, DatabaseConfig)> {
        let config = self.database_config()?;
        let db = self.database()?;
        db.initialize(config.clone())
            .await
            .with_context(|| format!("Could not connect to {}", config.endpoint()))?;
        Ok((db, config))
    }
}

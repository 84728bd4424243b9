//! Migration Runner - Executes migrations against the database
//!
//! Moves the schema up or down to a target version, one transaction per
//! migration, recording progress in the bookkeeping table.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use super::definitions::{Migration, MigrationDirection, MigrationRunResult, MigrationSource, MigrationTarget};
use super::manager::{split_sql_statements, MigrationManager};
use crate::backends::{DatabasePool, DatabaseValue};
use crate::error::{OrmError, OrmResult};

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    manager: MigrationManager,
    pool: Arc<dyn DatabasePool>,
}

impl MigrationRunner {
    pub fn new(manager: MigrationManager, pool: Arc<dyn DatabasePool>) -> Self {
        Self { manager, pool }
    }

    pub fn manager(&self) -> &MigrationManager {
        &self.manager
    }

    async fn ensure_schema_table(&self) -> OrmResult<()> {
        self.pool
            .execute(&self.manager.create_schema_table_sql(), &[])
            .await
            .map_err(|e| OrmError::Migration(format!("Failed to create schema version table: {}", e)))?;
        Ok(())
    }

    async fn run_script(&self, migration: &Migration, direction: MigrationDirection) -> OrmResult<()> {
        let verbose = self.manager.config().verbose;
        let script = match direction {
            MigrationDirection::Up => migration.up_sql.as_str(),
            MigrationDirection::Down => migration.down_sql.as_deref().ok_or_else(|| {
                OrmError::Migration(format!(
                    "Migration {} ({}) has no undo script",
                    migration.version, migration.filename
                ))
            })?,
        };
        let label = match direction {
            MigrationDirection::Up => migration.filename.clone(),
            MigrationDirection::Down => migration.filename.replacen(".do.", ".undo.", 1),
        };

        if verbose {
            tracing::info!(version = migration.version, "> {} ...", label);
        }

        let mut tx = self
            .pool
            .begin_transaction()
            .await
            .map_err(|e| OrmError::Migration(format!("Failed to start transaction: {}", e)))?;

        let outcome = async {
            for statement in split_sql_statements(script) {
                tx.execute(&statement, &[]).await.map_err(|e| {
                    OrmError::Migration(format!("Failed to execute migration {}: {}", label, e))
                })?;
            }

            let recorded = match direction {
                MigrationDirection::Up => {
                    let params = [
                        DatabaseValue::Int64(migration.version),
                        DatabaseValue::String(migration.name.clone()),
                    ];
                    tx.execute(&self.manager.record_version_sql(), &params).await
                }
                MigrationDirection::Down => {
                    let params = [DatabaseValue::Int64(migration.version)];
                    tx.execute(&self.manager.remove_version_sql(), &params).await
                }
            };
            recorded.map_err(|e| OrmError::Migration(format!("Failed to record migration {}: {}", label, e)))?;

            Ok::<(), OrmError>(())
        }
        .await;

        match outcome {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| OrmError::Migration(format!("Failed to commit migration {}: {}", label, e)))?;
                if verbose {
                    tracing::info!(version = migration.version, "done!");
                }
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::debug!(error = %rollback_err, "Rollback of failed migration also failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl MigrationSource for MigrationRunner {
    async fn max_version(&self) -> OrmResult<i64> {
        self.manager.max_version()
    }

    /// Fails when the bookkeeping table does not exist yet
    async fn applied_version(&self) -> OrmResult<i64> {
        let rows = self.pool.fetch_all(&self.manager.applied_version_sql(), &[]).await?;
        match rows.first() {
            Some(row) => row
                .get_by_name("version")?
                .as_i64()
                .ok_or_else(|| OrmError::Migration("Schema version is not a number".to_string())),
            None => Ok(0),
        }
    }

    async fn migrate_to(&self, target: MigrationTarget) -> OrmResult<MigrationRunResult> {
        let start = Instant::now();
        let verbose = self.manager.config().verbose;

        if verbose {
            tracing::info!(%target, "Starting to run migrations...");
        }

        let migrations = self.manager.load_migrations()?;
        let target_version = match target {
            MigrationTarget::Max => migrations.last().map(|m| m.version).unwrap_or(0),
            MigrationTarget::Version(0) => 0,
            MigrationTarget::Version(version) => {
                if !migrations.iter().any(|m| m.version == version) {
                    return Err(OrmError::Migration(format!("Version {} does not exist", version)));
                }
                version
            }
        };

        self.ensure_schema_table().await?;
        let current = self.applied_version().await?;

        let (direction, plan): (Option<MigrationDirection>, Vec<&Migration>) = if target_version > current {
            let plan = migrations
                .iter()
                .filter(|m| m.version > current && m.version <= target_version)
                .collect();
            (Some(MigrationDirection::Up), plan)
        } else if target_version < current {
            let plan = migrations
                .iter()
                .rev()
                .filter(|m| m.version <= current && m.version > target_version)
                .collect();
            (Some(MigrationDirection::Down), plan)
        } else {
            (None, Vec::new())
        };

        let mut executed = Vec::with_capacity(plan.len());
        if let Some(direction) = direction {
            for migration in plan {
                self.run_script(migration, direction).await?;
                executed.push(migration.version);
            }
        }

        tracing::debug!(
            from_version = current,
            to_version = target_version,
            executed = executed.len(),
            "Migrations complete"
        );
        if verbose {
            tracing::info!("Finished running migrations!");
        }

        Ok(MigrationRunResult {
            from_version: current,
            to_version: target_version,
            direction,
            executed,
            execution_time_ms: start.elapsed().as_millis(),
        })
    }
}

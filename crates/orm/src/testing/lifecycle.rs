//! Test database creation and teardown
//!
//! Both operations pass through the [`TestDatabaseGuard`] before touching
//! the server.

use holdfast_core::DatabaseConfig;
use serde::Serialize;

use super::guard::TestDatabaseGuard;
use crate::backends::{DatabaseConnection, DatabasePool, DatabaseValue};
use crate::error::{ModelError, OrmResult};
use crate::migrations::SCHEMA_VERSION_TABLE;

/// Outcome of a teardown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Tables wiped, in the order the server listed them
    pub tables: Vec<String>,
    pub statements_executed: usize,
}

/// Quote a MySQL identifier
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// Create the test database if missing and clear the global `sql_mode`.
///
/// `server` must be a server-scoped pool: the database may not exist yet.
pub async fn create_test_database(
    guard: &TestDatabaseGuard,
    server: &dyn DatabasePool,
    config: &DatabaseConfig,
) -> OrmResult<()> {
    guard.enforce(config)?;

    let mut conn = server.acquire().await?;
    let result = async {
        conn.execute(&format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(&config.name)), &[])
            .await?;
        conn.execute("SET GLOBAL sql_mode = ''", &[]).await?;
        Ok::<(), ModelError>(())
    }
    .await;
    conn.close().await?;

    if result.is_ok() {
        tracing::info!(database = %config.name, "Test database ready");
    }
    result
}

/// Statements that empty every table and reset its auto-increment counter
pub fn teardown_statements(database: &str, tables: &[String]) -> Vec<String> {
    let database = quote_identifier(database);
    tables
        .iter()
        .flat_map(|table| {
            let qualified = format!("{}.{}", database, quote_identifier(table));
            [
                format!("DELETE FROM {}", qualified),
                format!("ALTER TABLE {} AUTO_INCREMENT = 1", qualified),
            ]
        })
        .collect()
}

/// Wipe every table of the test database except the migration bookkeeping
/// table.
///
/// All statements run in order on one connection with foreign key checks
/// disabled. Checks are re-enabled even when a statement fails; the first
/// failure is then returned. A connection whose checks could not be
/// re-enabled is discarded, never handed back to the pool.
pub async fn teardown_test_database(
    guard: &TestDatabaseGuard,
    pool: &dyn DatabasePool,
    config: &DatabaseConfig,
) -> OrmResult<TeardownReport> {
    guard.enforce(config)?;

    let mut conn = pool.acquire().await?;
    let (result, session_clean) = wipe_tables(conn.as_mut(), &config.name).await;
    if session_clean {
        conn.close().await?;
    } else {
        tracing::warn!(database = %config.name, "Discarding connection left with foreign key checks disabled");
        if let Err(err) = conn.discard().await {
            tracing::debug!(error = %err, "Failed to discard connection");
        }
    }

    let report = result?;
    tracing::info!(
        database = %config.name,
        tables = report.tables.len(),
        "Test database torn down"
    );
    Ok(report)
}

/// Returns the outcome and whether the connection's session state is back
/// to its defaults
async fn wipe_tables(conn: &mut dyn DatabaseConnection, database: &str) -> (OrmResult<TeardownReport>, bool) {
    let tables = match list_tables(conn, database).await {
        Ok(tables) => tables,
        Err(err) => return (Err(err), true),
    };

    if let Err(err) = conn.execute("SET FOREIGN_KEY_CHECKS = 0", &[]).await {
        return (Err(err), true);
    }

    let mut executed = 1;
    let mut wipe = Ok(());
    for statement in teardown_statements(database, &tables) {
        if let Err(err) = conn.execute(&statement, &[]).await {
            tracing::error!(statement = %statement, error = %err, "Teardown statement failed");
            wipe = Err(err);
            break;
        }
        executed += 1;
    }

    let restore = conn.execute("SET FOREIGN_KEY_CHECKS = 1", &[]).await;
    let session_clean = restore.is_ok();
    let result = wipe.and(restore).map(|_| TeardownReport {
        tables,
        statements_executed: executed + 1,
    });
    (result, session_clean)
}

async fn list_tables(conn: &mut dyn DatabaseConnection, database: &str) -> OrmResult<Vec<String>> {
    let rows = conn
        .fetch_all(
            "SELECT table_name AS table_name FROM information_schema.tables \
             WHERE table_schema = ? AND table_name != ?",
            &[
                DatabaseValue::from(database),
                DatabaseValue::from(SCHEMA_VERSION_TABLE),
            ],
        )
        .await?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(table) = row.get_by_name("table_name")?.as_string() {
            tables.push(table);
        }
    }
    Ok(tables)
}

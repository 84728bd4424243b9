use anyhow::Context;
use console::style;

use super::CommandContext;

/// Create the test database if missing and migrate it to the newest version.
///
/// The configuration must describe a local test database; anything else
/// aborts the process before a statement is sent.
pub async fn setup(context: &CommandContext) -> anyhow::Result<()> {
    let config = context.database_config()?;
    let db = context.database()?;

    db.setup_test_database(config.clone())
        .await
        .with_context(|| format!("Failed to set up test database {}", config.name))?;
    db.close().await?;

    println!("{} Test database {} is ready", style("✓").green(), style(&config.name).cyan());
    Ok(())
}

/// Empty every table of the test database except the migration bookkeeping.
///
/// Same gate as `setup`; no session is opened, so nothing is contacted
/// before the configuration is accepted.
pub async fn teardown(context: &CommandContext) -> anyhow::Result<()> {
    let config = context.database_config()?;
    let db = context.database()?;

    let report = db
        .teardown_test_database(config.clone())
        .await
        .with_context(|| format!("Failed to tear down test database {}", config.name))?;

    println!(
        "{} Emptied {} table(s) in {}",
        style("✓").green(),
        report.tables.len(),
        style(&config.name).cyan()
    );
    Ok(())
}

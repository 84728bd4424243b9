use console::style;
use holdfast_orm::connection::PoolHealthReport;
use holdfast_orm::{DriftReport, DriftStatus};
use serde_json::json;

use super::CommandContext;

pub async fn run(context: &CommandContext, json: bool) -> anyhow::Result<()> {
    let (db, config) = context.connect().await?;

    let outcome = async {
        let health = PoolHealthReport::collect(db.pool()?.as_ref()).await?;
        let drift = db.check_migrations().await?;
        Ok::<_, anyhow::Error>((health, drift))
    }
    .await;
    db.close().await?;
    let (health, drift) = outcome?;

    if json {
        let report = json!({
            "database": config.redacted(),
            "health": health,
            "responsive": health.is_responsive(),
            "migrations": drift,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{} {}", style("Database:").bold(), config.endpoint());
    println!(
        "  {} answered in {}ms (pool {} / idle {} / active {})",
        if health.is_responsive() { style("✓").green() } else { style("!").yellow() },
        health.check_duration.as_millis(),
        health.pool_size,
        health.idle_connections,
        health.active_connections,
    );

    println!("{}", style("Migrations:").bold());
    match &drift {
        DriftReport::Determined { versions, status } => {
            let marker = match status {
                DriftStatus::InSync => style("✓").green(),
                DriftStatus::DatabaseBehind | DriftStatus::PackageBehind => style("!").yellow(),
            };
            println!(
                "  {} {} (available {}, applied {})",
                marker, status, versions.available_max_version, versions.applied_database_version
            );
        }
        DriftReport::Undetermined { reason } => {
            println!("  {} could not determine versions: {}", style("?").yellow(), reason);
        }
    }

    Ok(())
}

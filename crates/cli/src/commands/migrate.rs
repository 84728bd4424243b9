use console::style;
use holdfast_orm::migrations::MigrationDirection;
use holdfast_orm::MigrationTarget;

use super::CommandContext;

pub async fn run(context: &CommandContext, target: MigrationTarget) -> anyhow::Result<()> {
    let (db, _config) = context.connect().await?;

    let result = db.run_migrations(target).await;
    db.close().await?;
    let result = result?;

    if result.is_noop() {
        println!("Schema already at version {}", result.to_version);
        return Ok(());
    }

    let verb = match result.direction {
        Some(MigrationDirection::Down) => "Reverted",
        _ => "Applied",
    };
    let versions: Vec<String> = result.executed.iter().map(i64::to_string).collect();
    println!(
        "{} {} {} migration(s) [{}], version {} -> {} in {}ms",
        style("✓").green(),
        verb,
        result.executed.len(),
        versions.join(", "),
        result.from_version,
        result.to_version,
        result.execution_time_ms,
    );

    Ok(())
}

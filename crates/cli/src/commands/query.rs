use super::CommandContext;

/// Print the rows of one statement as a JSON array
pub async fn run(context: &CommandContext, sql: &str) -> anyhow::Result<()> {
    let (db, _config) = context.connect().await?;

    let rows = db.direct_query(sql).await;
    db.close().await?;

    println!("{}", serde_json::to_string_pretty(&rows?)?);
    Ok(())
}

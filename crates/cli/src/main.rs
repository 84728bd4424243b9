mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use holdfast_core::{init_logging, LoggingConfig};
use holdfast_orm::MigrationTarget;

use commands::*;

#[derive(Parser)]
#[command(name = "holdfast")]
#[command(about = "Connection checks, migrations and test-database chores for MySQL")]
#[command(version)]
struct Cli {
    /// YAML file with the database configuration (defaults to DB_* environment variables)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Migration scripts directory (defaults to $HOLDFAST_MIGRATIONS, then ./migrations)
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    /// Log statements and migration progress
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the connection (with retries) and report migration drift
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Move the schema to the newest or a given version
    Migrate {
        /// Target version; 0 undoes every migration
        #[arg(long)]
        to: Option<MigrationTarget>,
    },

    /// Create and migrate the configured test database
    SetupTestDb,

    /// Empty every table of the configured test database
    TeardownTestDb,

    /// Run one statement on a server-level connection and print the rows
    Query {
        /// SQL statement
        sql: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn logging(&self) -> LoggingConfig {
        let config = match self.log_format {
            LogFormat::Json => LoggingConfig::production(),
            LogFormat::Text => LoggingConfig::default().with_env_filter("holdfast=info,sqlx=warn"),
        };
        if self.verbose {
            config.with_level("debug").with_env_filter("holdfast=debug,sqlx=info")
        } else {
            config
        }
    }

    fn context(&self) -> CommandContext {
        CommandContext {
            config_file: self.config.clone(),
            migrations_dir: self.migrations.clone(),
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.logging()) {
        eprintln!("Failed to initialise logging: {}", err);
    }

    let context = cli.context();

    match cli.command {
        Commands::Check { json } => {
            check::run(&context, json).await?;
        }
        Commands::Migrate { to } => {
            migrate::run(&context, to.unwrap_or_default()).await?;
        }
        Commands::SetupTestDb => {
            test_db::setup(&context).await?;
        }
        Commands::TeardownTestDb => {
            test_db::teardown(&context).await?;
        }
        Commands::Query { sql } => {
            query::run(&context, &sql).await?;
        }
    }

    Ok(())
}

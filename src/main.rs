use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use job_application_tracker::config::Settings;
use job_application_tracker::domain::application::{ApplicationFilter, ApplicationStatus};
use job_application_tracker::telemetry::init_tracing;
use job_application_tracker::AppContext;

#[derive(Parser, Debug)]
#[command(
    name = "jobtrack",
    author,
    version,
    about = "Inspect and maintain the job application store."
)]
struct Cli {
    /// Override the configured connection string (e.g. sqlite://data/job_applications.db).
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage directory and all tables.
    Init,
    /// Verify the store answers a trivial query.
    Check,
    /// Pool usage and row counts per table.
    Stats,
    /// Application totals, response rate and the slowest statements.
    Summary,
    /// List applications matching every given filter.
    List {
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        status: Option<ApplicationStatus>,
        #[arg(long = "min-score")]
        min_score: Option<f64>,
    },
    /// Dump Prometheus metrics after a connection check.
    Metrics,
    /// Copy the store to a backup file.
    Backup {
        /// Destination file (default: `<store>.backup-YYYYmmdd-HHMMSS`).
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Suggest sources and match scores that have worked so far.
    Recommend,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::new().context("failed to load configuration")?;
    if let Some(url) = cli.database_url {
        settings.database.url = url;
    }
    init_tracing(&settings.logging)?;

    let ctx = AppContext::new(settings);
    let outcome = run(&ctx, cli.command).await;
    ctx.shutdown().await;
    outcome
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
    let db = ctx.engine().await?;

    match command {
        Command::Init => {
            db.init_schema().await?;
            print_json(&serde_json::json!({ "initialized": true }))?;
        }
        Command::Check => {
            let (ok, error) = db.check_connection().await;
            print_json(&serde_json::json!({ "connected": ok, "error": error }))?;
            if !ok {
                anyhow::bail!("database connection check failed");
            }
        }
        Command::Stats => {
            let stats = db.get_database_stats().await;
            print_json(&stats)?;
            if !stats.is_healthy() {
                anyhow::bail!("database is unhealthy");
            }
        }
        Command::Summary => {
            let tracker = ctx.tracker().await?;
            let applications = tracker.get_application_stats().await?;
            let recent_searches = tracker.recent_searches(5).await?;
            print_json(&serde_json::json!({
                "applications": applications,
                "recent_searches": recent_searches,
                "slow_queries": db.monitor().slow_queries(None),
                "most_frequent_queries": db.monitor().most_frequent(5),
            }))?;
        }
        Command::List {
            company,
            source,
            status,
            min_score,
        } => {
            let filter = ApplicationFilter {
                company,
                source,
                status,
                min_match_score: min_score,
                ..ApplicationFilter::default()
            };
            let applications = ctx.tracker().await?.get_applications(&filter).await?;
            print_json(&applications)?;
        }
        Command::Metrics => {
            print!("{}", db.metrics_report().await?);
        }
        Command::Backup { output } => {
            let destination = match output.or_else(|| db.default_backup_path()) {
                Some(path) => path,
                None => anyhow::bail!("in-memory stores need an explicit --output path"),
            };
            let path = db.backup(&destination).await?;
            print_json(&serde_json::json!({ "backup": path.display().to_string() }))?;
        }
        Command::Recommend => {
            let recommendations = ctx.tracker().await?.get_recommendations().await?;
            print_json(&recommendations)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

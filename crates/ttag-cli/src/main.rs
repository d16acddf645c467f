use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ttag_storage::PgRecordStore;
use ttag_sync::StoreBackend;

#[derive(Debug, Parser)]
#[command(name = "ttag-cli")]
#[command(about = "Tree & seed tagging pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull both Kobo collections once and reconcile them into the store
    Sync {
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply database migrations
    Migrate,
    /// Run the HTTP API and dashboard (and the scheduler when enabled)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync { json: false }) {
        Commands::Sync { json } => {
            let summary = ttag_sync::run_sync_once_from_env().await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("serializing run summary")?
                );
            } else {
                println!("sync run {}", summary.run_id);
                for report in &summary.categories {
                    match &report.fatal_error {
                        Some(err) => println!("  {}: aborted ({err})", report.category),
                        None => println!(
                            "  {}: fetched={} success={} duplicate={} updated={} error={} skipped={}",
                            report.category,
                            report.fetched,
                            report.success,
                            report.duplicate,
                            report.updated,
                            report.errors,
                            report.skipped
                        ),
                    }
                }
                if let Some(manifest) = &summary.snapshot_manifest {
                    println!("  backup manifest: {manifest}");
                }
            }
            if !summary.is_success() {
                bail!("sync finished with failures: {}", summary.fatal_errors().join("; "));
            }
        }
        Commands::Migrate => {
            match StoreBackend::from_env()? {
                StoreBackend::Postgres(db) => {
                    let store = PgRecordStore::connect(&db)
                        .await
                        .context("connecting to record store")?;
                    store.migrate().await.context("applying migrations")?;
                    info!(database = %db.name, "migrations applied");
                }
                StoreBackend::Memory => {
                    eprintln!("TTAG_STORE=memory has no schema to migrate");
                }
            }
        }
        Commands::Serve => {
            ttag_web::serve_from_env().await?;
        }
    }

    Ok(())
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use lurk_core::{ScanCursor, TransitionPayload};
use lurk_storage::{CursorStore, PgStore};
use lurk_sync::{ReviewService, SyncConfig};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "lurk")]
#[command(about = "Scan community channels for intent signals and review what turns up")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one scan cycle
    Scan,
    /// Serve the review API (and the scheduler when LURK_SCHEDULER_ENABLED is set)
    Serve,
    Migrate,
    /// Move the scan cursor back to the start
    Reset,
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Transition {
        id: Uuid,
        status: String,
        #[arg(long)]
        reply_url: Option<String>,
        #[arg(long)]
        feedback: Option<String>,
    },
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Scan) {
        Commands::Scan => {
            let report = lurk_sync::run_scan_once_from_env().await?;
            println!(
                "scan complete: run_id={} cursor={}->{} fetched={} inserted={} duplicate={} failed={} unclassifiable={}",
                report.run_id,
                report.from,
                report.to,
                report.fetched,
                report.ingest.inserted,
                report.ingest.duplicate,
                report.ingest.failed,
                report.classification_failures.len()
            );
        }
        Commands::Serve => lurk_web::serve_from_env().await?,
        Commands::Migrate => {
            PgStore::connect(&config.database_url).await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Reset => {
            let stores = lurk_sync::open_stores(&config).await?;
            stores.cursors.save(&ScanCursor::default()).await?;
            println!("scan cursor reset");
        }
        Commands::List { status } => {
            let stores = lurk_sync::open_stores(&config).await?;
            let review = ReviewService::new(stores.opportunities);
            for o in review.list_by_status(status.as_deref()).await? {
                println!(
                    "{}\t{}\t{}\tr/{}\t{}",
                    o.id,
                    o.status,
                    o.intent.as_str(),
                    o.origin_channel,
                    o.title
                );
            }
        }
        Commands::Transition {
            id,
            status,
            reply_url,
            feedback,
        } => {
            let stores = lurk_sync::open_stores(&config).await?;
            let review = ReviewService::new(stores.opportunities);
            let payload = TransitionPayload {
                reply_url,
                feedback,
                ..TransitionPayload::default()
            };
            let updated = review.transition(id, &status, payload).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Commands::Stats => {
            let stores = lurk_sync::open_stores(&config).await?;
            let stats = ReviewService::new(stores.opportunities).stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use resagg_storage::{ListingStore, MemoryListingStore, PgListingStore};
use resagg_sync::{reminder_scanner, IngestScheduler, IngestionPipeline, SyncConfig};
use resagg_web::AppState;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "resagg-cli")]
#[command(about = "Research Aggregator: conference and research-opportunity ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Migrate, then run the daily scheduler and the read API until Ctrl-C.
    Serve,
    /// Run one ingestion now and print its summary.
    Ingest {
        /// Write into a throwaway in-memory store instead of the database.
        #[arg(long)]
        in_memory: bool,
    },
    /// Run one reminder scan now.
    Remind,
    /// Apply pending SQL migrations.
    Migrate,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

async fn connect(config: &SyncConfig) -> Result<PgListingStore> {
    let store = PgListingStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await.context("applying migrations")?;
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Ingest { in_memory } => {
            let store: Arc<dyn ListingStore> = if in_memory {
                Arc::new(MemoryListingStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };
            let pipeline = IngestionPipeline::from_config(&config, store)?;
            let summary = pipeline.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Remind => {
            let store = Arc::new(connect(&config).await?);
            let summary = reminder_scanner(&config, store)
                .scan(Utc::now().date_naive())
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            connect(&config).await?;
            println!("migrations applied");
        }
    }

    Ok(())
}

async fn serve(config: SyncConfig) -> Result<()> {
    let store: Arc<dyn ListingStore> = Arc::new(connect(&config).await?);
    let pipeline = Arc::new(IngestionPipeline::from_config(&config, store.clone())?);
    let reminder = Arc::new(reminder_scanner(&config, store.clone()));

    let mut scheduler = IngestScheduler::new(pipeline, reminder, config.schedule());
    if config.scheduler_enabled {
        scheduler.start().await?;
    } else {
        warn!("scheduler disabled; only the read API is running");
    }

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "could not listen for Ctrl-C; serving until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };
    let served = resagg_web::serve(AppState::new(store), config.web_port, shutdown).await;

    shutdown_after_serve(served, scheduler.stop().await)
}

/// The serve outcome wins; a failed scheduler stop only surfaces when serving succeeded.
fn shutdown_after_serve(served: Result<()>, stopped: Result<()>) -> Result<()> {
    match (served, stopped) {
        (Err(err), Err(stop_err)) => {
            warn!(error = %stop_err, "scheduler did not stop cleanly");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), stopped) => stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn serve_error_survives_a_failed_scheduler_stop() {
        let err = shutdown_after_serve(
            Err(anyhow!("address already in use")),
            Err(anyhow!("scheduler shutdown timed out")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("address already in use"));
    }

    #[test]
    fn stop_error_is_reported_after_a_clean_serve() {
        let err = shutdown_after_serve(Ok(()), Err(anyhow!("scheduler shutdown timed out")))
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(shutdown_after_serve(Ok(()), Ok(())).is_ok());
    }
}

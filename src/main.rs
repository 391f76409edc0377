/// Ledger History Ingester
///
/// Reads ledgers from a backend and records a summary row per ledger in PostgreSQL.
mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use ledger_history_ingester::{
    db::{
        backend::DatabaseBackend,
        history::{PageOrder, PageQuery},
        Database,
    },
    rpc::{HttpLedgerBackend, LedgerBackend},
    LedgersProcessor, Pipeline, PipelineConfig,
};
use std::env;
use tokio_util::sync::CancellationToken;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    println!("🚀 Starting Ledger History Ingester...");

    // Initialize database connection
    let database_url = match &cli.database_url {
        Some(url) => url.clone(),
        None => env::var("DATABASE_URL").context("DATABASE_URL not found in environment. Please check your .env file")?,
    };

    println!("\n💾 Connecting to PostgreSQL database...");
    let database =
        Database::new(&database_url, cli.max_connections).await.context("Failed to connect to PostgreSQL database")?;
    database.test_connection().await.context("Database connection test failed")?;
    println!("✅ Database connected successfully!");

    if !cli.skip_migrations {
        println!("📋 Running database migrations...");
        database.migrate().await.context("Failed to run database migrations")?;
    }

    let backend = connect_backend(&cli).await?;

    // Resume one past the latest ingested ledger unless told otherwise
    let history = database.history();
    let start_ledger = match cli.start_ledger {
        Some(start) => start,
        None => {
            let latest = history.latest_ledger_sequence().await.context("Failed to load latest ingested ledger")?;
            latest.map_or(1, |s| s + 1)
        }
    };
    let end_ledger = cli.calculate_end_ledger(start_ledger);

    match backend.latest_ledger_sequence().await {
        Ok(tip) => println!("🎯 Backend tip: ledger {}", tip),
        Err(e) => tracing::warn!("Could not read backend tip: {}", e),
    }
    println!("📍 Ledger range: {} to {}", start_ledger, end_ledger.map_or("tip".to_string(), |e| e.to_string()));

    let config = PipelineConfig {
        start_ledger,
        end_ledger,
        max_retries: cli.max_retries,
        retry_delay: cli.retry_delay(),
        poll_interval: cli.poll_interval(),
        fetch_timeout: cli.fetch_timeout(),
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, abandoning the current ledger");
            shutdown.cancel();
        }
    });

    let pipeline = Pipeline::new(backend, LedgersProcessor::new(history), config, cancel);

    tracing::info!("Ledger History Ingester initialized successfully");
    let stats = pipeline.run().await.context("Pipeline execution failed")?;

    pipeline.print_final_stats(&stats);

    if let Some(watermark) = stats.watermark {
        let history = database.history();
        let page = PageQuery::from_ledger(watermark, PageOrder::Desc, 3)?;
        let recent = history.ledgers_page(&page).await.context("Failed to load recent ledgers")?;
        if !recent.is_empty() {
            println!("\n📒 Recent ledgers:");
        }
        for row in recent {
            let closed_at = row.closed_at.format("%Y-%m-%d %H:%M:%S UTC");
            println!(
                "   {} ({}) closed at {}, {} operations",
                row.sequence, row.ledger_hash, closed_at, row.operation_count
            );
        }
        let usage = history.ledger_capacity_usage_stats(watermark).await.context("Failed to load capacity usage")?;
        if let Some(capacity) = usage.capacity_usage {
            println!("📈 Ledger capacity usage (last 5 ledgers): {:.2}", capacity);
        }
    }

    println!("\n✨ Ingestion complete!");

    Ok(())
}

/// Pick the ledger backend from the CLI flags or environment
async fn connect_backend(cli: &Cli) -> Result<Box<dyn LedgerBackend>> {
    let core_database_url = cli.core_database_url.clone().or_else(|| env::var("CORE_DATABASE_URL").ok());

    if let Some(url) = core_database_url {
        println!("🗄️  Reading ledgers from core database");
        let core = Database::new(&url, 2).await.context("Failed to connect to core database")?;
        return Ok(Box::new(DatabaseBackend::new(core.pool().clone())));
    }

    let backend_url = match &cli.backend_url {
        Some(url) => url.clone(),
        None => env::var("LEDGER_BACKEND_URL")
            .context("LEDGER_BACKEND_URL not found in environment. Please check your .env file")?,
    };

    let backend = HttpLedgerBackend::new(backend_url).context("Failed to create ledger backend client")?;
    println!("✅ Ledger backend: {}", backend.endpoint());
    Ok(Box::new(backend))
}

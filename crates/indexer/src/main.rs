//! Curio Indexer - collectible contract event ingestion
//!
//! This binary provides:
//! - Live event listening (WebSocket with poll fallback)
//! - Historical backfill over `getLogs`
//! - JSONL journaling and SQLite projections
//!
//! Note: The HTTP API is provided by the separate `curio-api` service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use curio_indexer::config::{Config, LoggingConfig};
use curio_indexer::storage::Storage;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "curio-indexer")]
#[command(version, about = "Event-sourcing indexer for the curio collectible contracts", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the live indexer (replay, then follow the chain head)
    Run,

    /// Backfill historical events up to the current head, then exit
    Backfill,

    /// Show projection statistics
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://curio.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging, cli.debug)?;
            run_indexer(config).await?
        }
        Commands::Backfill => {
            let config = load_config(&cli.config)?;
            init_logging(&config.logging, cli.debug)?;
            run_backfill(config).await?
        }
        Commands::Status => {
            init_logging(&LoggingConfig::default(), cli.debug)?;
            show_status(&cli.config).await?
        }
        Commands::InitDb { database_url } => {
            init_logging(&LoggingConfig::default(), cli.debug)?;
            init_database(&database_url).await?
        }
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    Config::from_file(path).context("Failed to load configuration")
}

/// Initialize tracing subscriber for logging
fn init_logging(logging: &LoggingConfig, debug: bool) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let directive = if debug {
        "curio_indexer=debug,sqlx=warn".to_string()
    } else {
        format!("curio_indexer={},sqlx=warn", logging.level)
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

/// Live indexer service: replay the journal, then follow the chain.
async fn run_indexer(config: Config) -> Result<()> {
    use curio_indexer::eventlog::EventLogs;
    use curio_indexer::listener::{LiveEngine, RpcProvider};

    info!("Curio Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.http_url);
    info!("  Database: {}", config.database.url);
    info!("  Data dir: {}", config.storage.data_dir);
    info!("  Confirmations: {}", config.sync.confirmations);

    let storage = Storage::from_config(&config.database)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    info!("Database initialized");

    let logs = EventLogs::open(&config.storage.data_dir)
        .context("Failed to open the JSONL event logs")?;

    let provider =
        RpcProvider::new(&config.network.http_url).context("Failed to create RPC provider")?;

    let engine = LiveEngine::new(provider, storage.clone(), logs, config);
    let live_handle = tokio::spawn(async move { engine.run().await });

    info!("Live worker started. Press Ctrl+C to stop.");
    info!("For API queries, run the curio-api service separately.");

    tokio::select! {
        result = live_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Live worker exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Live worker failed"),
                Err(e) => Err(anyhow::anyhow!("Live worker task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");
            storage.close().await;
            Ok(())
        }
    }
}

/// One-shot historical backfill.
async fn run_backfill(config: Config) -> Result<()> {
    use curio_indexer::backfill::BackfillEngine;
    use curio_indexer::eventlog::EventLogs;
    use curio_indexer::listener::RpcProvider;

    info!("Curio backfill starting...");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.http_url);
    info!("  Chunk size: {}", config.backfill.chunk_size);

    let storage = Storage::from_config(&config.database)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let logs = EventLogs::open(&config.storage.data_dir)
        .context("Failed to open the JSONL event logs")?;

    let provider =
        RpcProvider::new(&config.network.http_url).context("Failed to create RPC provider")?;

    let engine = BackfillEngine::new(provider, storage.clone(), logs, config);
    let result = engine.run().await;

    let stats = storage.stats().await?;
    info!("  Listings: {}", stats.listing_count);
    info!("  Collectibles: {}", stats.collectible_count);
    info!("  Activity events: {}", stats.activity_count);

    storage.close().await;
    result
}

/// Show projection statistics
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database only if the config file is missing.
    let (database_url, data_dir) = match Config::from_file(config_path) {
        Ok(config) => (config.database.url, Some(config.storage.data_dir)),
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
            });
            if is_not_found {
                info!("Config file not found, using default database: sqlite://curio.db");
                ("sqlite://curio.db".to_string(), None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let stats = storage.stats().await?;

    println!("\n=== Curio Indexer Status ===\n");
    println!("Database Statistics:");
    println!("  Listings: {}", stats.listing_count);
    println!("  Collectibles: {}", stats.collectible_count);
    println!("  Activity Events: {}", stats.activity_count);
    println!(
        "  Last Activity Block: {}",
        stats
            .last_activity_block
            .map(|b| b.to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    if let Some(data_dir) = data_dir {
        use curio_indexer::eventlog::{self, COMBINED_LOG_FILE};
        let combined = std::path::Path::new(&data_dir).join(COMBINED_LOG_FILE);
        let (events, skipped) = eventlog::load_combined(&combined)?;
        println!("\nEvent Journal:");
        println!("  Combined events: {}", events.len());
        if skipped > 0 {
            println!("  Malformed lines: {}", skipped);
        }
    }

    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Listings: {}", stats.listing_count);
    info!("  Collectibles: {}", stats.collectible_count);
    info!("  Activity events: {}", stats.activity_count);

    storage.close().await;

    Ok(())
}

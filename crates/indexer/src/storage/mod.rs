//! Storage layer for the curio indexer.
//!
//! This module provides database operations for:
//! - Listings (marketplace projection, latest-wins upserts)
//! - Collectibles (lifecycle projection keyed by rfid hash)
//! - Activity events (append-only audit trail)
//! - Collectible images (upload metadata)
//!
//! All of it is derived state: the JSONL event log can rebuild every table.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::config::DatabaseConfig;

pub mod activity;
pub mod collectibles;
pub mod images;
pub mod listings;
pub mod types;

pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite with connection pooling. Reads through
/// the same pool observe committed writes immediately (read-your-writes).
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// Creates the database file if it doesn't exist. Migrations are a
    /// separate call so callers control when schema changes happen.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_sizes(database_url, 5, 1).await
    }

    /// Create a storage instance from the `[database]` config section.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_pool_sizes(&config.url, config.max_connections, config.min_connections).await
    }

    async fn with_pool_sizes(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    ///
    /// Useful for custom queries or transactions (the reducer uses this to
    /// pair an aggregate upsert with its activity append).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let listing_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM listings")
            .fetch_one(&self.pool)
            .await?;

        let collectible_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collectibles")
            .fetch_one(&self.pool)
            .await?;

        let activity_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activity_events")
            .fetch_one(&self.pool)
            .await?;

        let last_activity_block: Option<i64> =
            sqlx::query_scalar("SELECT MAX(block) FROM activity_events")
                .fetch_one(&self.pool)
                .await?;

        Ok(DatabaseStats {
            listing_count: listing_count as u64,
            collectible_count: collectible_count as u64,
            activity_count: activity_count as u64,
            last_activity_block: last_activity_block.map(|b| b as u64),
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of listing rows
    pub listing_count: u64,

    /// Total number of collectible rows
    pub collectible_count: u64,

    /// Total number of activity rows
    pub activity_count: u64,

    /// Highest block seen in the activity trail
    pub last_activity_block: Option<u64>,
}

#[cfg(test)]
pub(crate) async fn setup_storage() -> (Storage, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = Storage::new_with_path(dir.path().join("test.db"))
        .await
        .unwrap();
    storage.run_migrations().await.unwrap();
    (storage, dir)
}

//! Database layer for ScholarMerge
//!
//! Provides:
//! - The `DocumentStore` contract shared by every component
//! - SeaORM entity models and the Postgres repository
//! - An in-process store with identical semantics
//! - Connection pool management and schema setup

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::MemoryStore;
pub use repository::Repository;
pub use store::{DocumentStore, IdentifierQuery, ABSTRACT_SIMILARITY_SWEEP, ENTRIES_BUILDER_SWEEP};

use crate::config::{AppConfig, DatabaseConfig, StoreBackend};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SCHEMA: &str = include_str!("../../migrations/001_init.sql");

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        info!("Database connection established");

        Ok(Self { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply the bundled schema. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<()> {
        self.conn.execute_unprepared(SCHEMA).await?;
        info!("Schema up to date");
        Ok(())
    }
}

/// Open the configured store backend.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    let backend = config.store.backend;
    if !backend.is_persistent() {
        warn!(?backend, "Store is not persistent; nothing is kept after this process exits");
    }
    match backend {
        StoreBackend::Memory => {
            info!("Using in-process memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = DbPool::new(&config.database).await?;
            pool.migrate().await?;
            Ok(Arc::new(Repository::new(pool)))
        }
    }
}

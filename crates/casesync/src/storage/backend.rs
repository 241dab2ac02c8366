use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::storage::schema::SCHEMA;
use crate::storage::types::{Result, StorageError};

/// Pooled SQLite connection shared by the entity store and the run log
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (creating if missing) a database file and apply the schema
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.initialize_schema().await?;

        info!("[SqliteBackend] Opened database at {}", path.display());
        Ok(backend)
    }

    /// Private in-memory database; a single connection keeps it alive
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let backend = Self { pool };
        backend.initialize_schema().await?;
        Ok(backend)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            debug!("[SqliteBackend] Applying schema statement: {}", statement.trim());
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::SchemaError(format!("{}: {}", statement.trim(), e)))?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

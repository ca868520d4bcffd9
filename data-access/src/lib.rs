//! Data Access Layer for the site archiver
//!
//! Persists archives, pages, assets and scheduled archives in SQLite.
//! Pages and assets are removed by cascade when their owner is deleted.

pub mod schema;
pub mod repository;

pub use repository::*;

use site_archiver_core::*;
use std::path::Path;
use tokio_rusqlite::Connection;
use std::sync::Arc;

/// Database manager for handling SQLite connections
pub struct DatabaseManager {
    connection: Arc<Connection>,
}

impl DatabaseManager {
    /// Create a new database manager with the specified path
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ArchiverError::configuration(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let connection = Connection::open(path)
            .await
            .map_err(|e| ArchiverError::configuration(format!("Failed to open database: {}", e)))?;

        let manager = Self {
            connection: Arc::new(connection),
        };

        manager.initialize_schema().await?;

        Ok(manager)
    }

    /// Create an in-memory database (for testing)
    pub async fn in_memory() -> Result<Self> {
        let connection = Connection::open(":memory:")
            .await
            .map_err(|e| {
                ArchiverError::configuration(format!("Failed to create in-memory database: {}", e))
            })?;

        let manager = Self {
            connection: Arc::new(connection),
        };

        manager.initialize_schema().await?;

        Ok(manager)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> Result<()> {
        let applied_at = Utc::now().timestamp();

        self.connection
            .call(move |conn| {
                conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
                for migration in schema::MIGRATIONS {
                    conn.execute_batch(migration.sql)?;
                    conn.execute(
                        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) \
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![migration.version, applied_at, migration.description],
                    )?;
                }
                Ok(())
            })
            .await
            .map_err(|e| ArchiverError::configuration(format!("Failed to initialize schema: {}", e)))?;

        tracing::debug!("Database schema at version {}", schema::SCHEMA_VERSION);
        Ok(())
    }

    /// Get the connection for repository operations
    pub fn connection(&self) -> Arc<Connection> {
        Arc::clone(&self.connection)
    }

    pub fn archive_repository(&self) -> SqliteArchiveRepository {
        SqliteArchiveRepository::new(self.connection())
    }

    pub fn page_repository(&self) -> SqlitePageRepository {
        SqlitePageRepository::new(self.connection())
    }

    pub fn asset_repository(&self) -> SqliteAssetRepository {
        SqliteAssetRepository::new(self.connection())
    }

    pub fn schedule_repository(&self) -> SqliteScheduleRepository {
        SqliteScheduleRepository::new(self.connection())
    }
}

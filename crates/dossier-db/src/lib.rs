//! # dossier-db
//!
//! Persistence layer for dossier.
//!
//! This crate provides:
//! - A pool sized for the background worker
//! - The PostgreSQL source record repository (plus an in-memory twin)
//! - Checksums and storage key construction
//! - Object store backends (filesystem, HTTP, in-memory) and the timed uploader
//!
//! ## Example
//!
//! ```rust,ignore
//! use dossier_db::Database;
//!
//! let db = Database::connect("postgres://localhost/dossier").await?;
//! let records = db.source_records.list_for_owner("user-1", 50).await?;
//! ```

pub mod file_storage;
pub mod memory;
pub mod pool;
pub mod remote_storage;
pub mod source_records;

// Re-export core types
pub use dossier_core::*;

pub use file_storage::{
    compute_checksum, sanitize_file_name, FilesystemObjectStore, MemoryObjectStore,
    StoragePathBuilder, StorageUploader,
};
pub use memory::{apply_status_update, MemorySourceRecordRepository};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use remote_storage::{HttpObjectStore, HttpObjectStoreConfig};
pub use source_records::PgSourceRecordRepository;

/// PostgreSQL-backed persistence: the pool plus the repositories built on it.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub source_records: PgSourceRecordRepository,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            source_records: PgSourceRecordRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        Ok(Self::new(create_pool(url).await?))
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        Ok(Self::new(create_pool_with_config(url, config).await?))
    }

    /// Apply the `source_records` schema migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))
    }
}

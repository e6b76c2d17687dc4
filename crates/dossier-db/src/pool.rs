//! PostgreSQL pool setup.
//!
//! Every background job holds at most one connection at a time while it
//! writes status changes, so the pool is sized from the worker concurrency
//! plus headroom for request handlers.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use dossier_core::{defaults, Error, Result};

/// Connections kept for request handlers on top of one per background job.
const HANDLER_HEADROOM: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Upper bound for acquiring a connection; a slow database surfaces as a retryable error.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::JOB_MAX_CONCURRENT as u32 + HANDLER_HEADROOM,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(defaults::STORAGE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DOSSIER_DB_MAX_CONNECTIONS` | `JOB_MAX_CONCURRENT + 4` |
    /// | `DOSSIER_DB_CONNECT_TIMEOUT_SECS` | `30` |
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `DOSSIER_DB_*` variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        let max_connections = std::env::var("DOSSIER_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.max_connections);
        let acquire_timeout = std::env::var("DOSSIER_DB_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.acquire_timeout);
        self.with_max_connections(max_connections)
            .with_acquire_timeout(acquire_timeout)
    }

    /// Size the pool for `jobs` concurrent background jobs.
    pub fn for_worker_concurrency(jobs: usize) -> Self {
        Self::default().with_max_connections(jobs as u32 + HANDLER_HEADROOM)
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect with the default [`PoolConfig`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Source record database connected"
    );
    Ok(pool)
}

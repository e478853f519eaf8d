//! `SQLite` persistence sink.
//!
//! Pool setup lives in [`connection`], schema in [`migrations`], and SQL in
//! the stateless [`repositories`]. [`SqliteSink`] ties them together and runs
//! every query on the blocking thread pool.

pub mod connection;
pub mod migrations;
pub mod repositories;

use std::path::Path;

use apex_core::{Alert, AlertId, SensorSample};
use async_trait::async_trait;
use rusqlite::Connection;
use tracing::info;

use crate::errors::{Result, StoreError};
use crate::sink::{PersistenceSink, UpsertOutcome};
use connection::{ConnectionConfig, ConnectionPool};
use repositories::{AlertRepo, ReadingRepo};

/// [`PersistenceSink`] backed by an `SQLite` database.
#[derive(Clone)]
pub struct SqliteSink {
    pool: ConnectionPool,
}

impl SqliteSink {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Internal(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| StoreError::Internal(format!("non UTF-8 path: {}", path.display())))?;
        let sink = Self::from_pool(connection::new_file(path_str, config)?)?;
        info!(path = %path.display(), "sqlite sink ready");
        Ok(sink)
    }

    /// Migrated in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::from_pool(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    fn from_pool(pool: ConnectionPool) -> Result<Self> {
        {
            let conn = pool.get()?;
            let _ = migrations::run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("blocking task failed: {e}")))?
    }

    /// Stored reading count.
    pub async fn sample_count(&self) -> Result<i64> {
        self.with_conn(ReadingRepo::count).await
    }

    /// Look up an alert.
    pub async fn alert(&self, id: &AlertId) -> Result<Option<Alert>> {
        let id = id.clone();
        self.with_conn(move |conn| AlertRepo::get(conn, &id)).await
    }
}

#[async_trait]
impl PersistenceSink for SqliteSink {
    async fn write_sample(&self, sample: &SensorSample) -> Result<()> {
        let sample = sample.clone();
        self.with_conn(move |conn| ReadingRepo::insert(conn, &sample).map(|_| ()))
            .await
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<UpsertOutcome> {
        let alert = alert.clone();
        self.with_conn(move |conn| AlertRepo::upsert(conn, &alert)).await
    }

    async fn find_alert(&self, id: &AlertId) -> Result<Option<Alert>> {
        self.alert(id).await
    }
}

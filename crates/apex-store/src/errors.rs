//! Error types for persistence and caching.

use apex_core::AlertStatus;
use thiserror::Error;

/// Errors returned by a [`PersistenceSink`](crate::PersistenceSink).
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// An alert update would move its status backwards.
    #[error("invalid alert transition: {from} -> {to}")]
    InvalidTransition {
        /// Stored status.
        from: AlertStatus,
        /// Requested status.
        to: AlertStatus,
    },

    /// Failure injected or reported by a sink that is not backed by a database.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// Internal error (e.g. a blocking task panicked, a stored row is unreadable).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by a [`ReadCache`](crate::ReadCache).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_display() {
        let err = StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().contains("sqlite error"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = StoreError::InvalidTransition {
            from: AlertStatus::Resolved,
            to: AlertStatus::Open,
        };
        assert_eq!(err.to_string(), "invalid alert transition: resolved -> open");
    }

    #[test]
    fn migration_error_display() {
        let err = StoreError::Migration {
            message: "v1 failed".into(),
        };
        assert_eq!(err.to_string(), "migration error: v1 failed");
    }
}

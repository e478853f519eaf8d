//! # apex-store
//!
//! Where ingested telemetry goes after fan-out:
//!
//! - [`PersistenceSink`]: `write_sample` / `upsert_alert`, implemented by
//!   [`SqliteSink`] (`rusqlite` + `r2d2`, WAL, embedded migrations) and
//!   [`MemorySink`]
//! - [`ReadCache`]: TTL key-value cache, implemented by [`InMemoryTtlCache`]

#![deny(unsafe_code)]

pub mod cache;
pub mod errors;
pub mod sink;
pub mod sqlite;

pub use cache::{InMemoryTtlCache, ReadCache};
pub use errors::{CacheError, Result, StoreError};
pub use sink::{MemorySink, PersistenceSink, UpsertOutcome, decide_upsert};
pub use sqlite::SqliteSink;
pub use sqlite::connection::ConnectionConfig;

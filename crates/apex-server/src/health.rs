//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::ingest::IngestSnapshot;
use crate::ingest::persist::PersistSnapshot;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live WebSocket sessions.
    pub connections: usize,
    /// Topics with at least one subscriber. Emptied topics stay in the
    /// registry but are not counted here.
    pub topics: usize,
    /// Ingestion counters.
    pub ingest: IngestSnapshot,
    /// Persistence counters.
    pub persist: PersistSnapshot,
}

/// Inputs to [`health_check`].
#[derive(Debug, Clone, Copy)]
pub struct HealthInputs {
    /// Server start.
    pub start_time: Instant,
    /// Whether shutdown has begun.
    pub shutting_down: bool,
    /// Live sessions.
    pub connections: usize,
    /// Registry topics.
    pub topics: usize,
    /// Ingestion counters.
    pub ingest: IngestSnapshot,
    /// Persistence counters.
    pub persist: PersistSnapshot,
}

/// Build a health response from live counters.
pub fn health_check(inputs: HealthInputs) -> HealthResponse {
    HealthResponse {
        status: if inputs.shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: inputs.start_time.elapsed().as_secs(),
        connections: inputs.connections,
        topics: inputs.topics,
        ingest: inputs.ingest,
        persist: inputs.persist,
    }
}

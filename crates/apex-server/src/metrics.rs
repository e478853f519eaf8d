//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::errors::{Result, ServerError};

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty page; used where a handle is required but nothing
/// should be recorded, such as tests.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Rejected upgrades (counter, labels: reason).
pub const WS_HANDSHAKE_FAILURES_TOTAL: &str = "ws_handshake_failures_total";
/// Frames evicted by drop-oldest (counter).
pub const WS_QUEUE_DROPS_TOTAL: &str = "ws_queue_drops_total";
/// Sessions ended by a transport failure (counter, labels: cause).
pub const WS_SEND_FAILURES_TOTAL: &str = "ws_send_failures_total";
/// Inbound client frames ignored (counter).
pub const WS_FRAMES_IGNORED_TOTAL: &str = "ws_frames_ignored_total";
/// Events normalized (counter, labels: kind).
pub const INGEST_EVENTS_TOTAL: &str = "ingest_events_total";
/// Raw bus messages that failed to parse (counter).
pub const INGEST_PARSE_FAILURES_TOTAL: &str = "ingest_parse_failures_total";
/// Sessions reached per broadcast (histogram).
pub const INGEST_BROADCAST_RECIPIENTS: &str = "ingest_broadcast_recipients";
/// Alert updates not pushed because the store refused them (counter).
pub const INGEST_UPDATES_REJECTED_TOTAL: &str = "ingest_updates_rejected_total";
/// Sink write failures (counter, labels: op).
pub const PERSIST_FAILURES_TOTAL: &str = "persist_failures_total";
/// Persistence jobs dropped on a full queue (counter).
pub const PERSIST_DROPPED_TOTAL: &str = "persist_dropped_total";
/// Read-cache invalidations (counter).
pub const CACHE_INVALIDATIONS_TOTAL: &str = "cache_invalidations_total";
/// Read-cache invalidations that failed (counter).
pub const CACHE_INVALIDATION_FAILURES_TOTAL: &str = "cache_invalidation_failures_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_handle_renders() {
        let handle = detached_handle();
        assert!(handle.render().is_empty());
    }

    #[test]
    fn names_are_unique() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_HANDSHAKE_FAILURES_TOTAL,
            WS_QUEUE_DROPS_TOTAL,
            WS_SEND_FAILURES_TOTAL,
            WS_FRAMES_IGNORED_TOTAL,
            INGEST_EVENTS_TOTAL,
            INGEST_PARSE_FAILURES_TOTAL,
            INGEST_BROADCAST_RECIPIENTS,
            INGEST_UPDATES_REJECTED_TOTAL,
            PERSIST_FAILURES_TOTAL,
            PERSIST_DROPPED_TOTAL,
            CACHE_INVALIDATIONS_TOTAL,
            CACHE_INVALIDATION_FAILURES_TOTAL,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}

//! Event ingestion: raw bus message to persistence job and fan-out.

pub mod persist;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use apex_core::{AlertRaised, IngestedEvent, MessageBody, OutboundMessage, ParseError};
use metrics::{counter, histogram};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::bus::EventSource;
use crate::metrics::{
    INGEST_BROADCAST_RECIPIENTS, INGEST_EVENTS_TOTAL, INGEST_PARSE_FAILURES_TOTAL,
    INGEST_UPDATES_REJECTED_TOTAL,
};
use crate::websocket::ConnectionManager;

pub use persist::{
    CacheInvalidation, PersistJob, PersistSnapshot, PersistStats, PersistenceWriter,
    UpdateReceipt,
};

/// Live ingestion counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    parse_failures: AtomicU64,
    broadcasts: AtomicU64,
}

impl IngestStats {
    /// Point-in-time copy.
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }
}

/// Ingestion counters as reported by `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSnapshot {
    /// Raw messages seen.
    pub received: u64,
    /// Raw messages that failed to parse.
    pub parse_failures: u64,
    /// Events handed to fan-out.
    pub broadcasts: u64,
}

/// Turns raw bus messages into persisted records and pushed frames.
#[derive(Clone)]
pub struct EventIngestor {
    manager: Arc<ConnectionManager>,
    persist: Option<PersistenceWriter>,
    stats: Arc<IngestStats>,
}

impl EventIngestor {
    /// Ingestor fanning out through `manager` and persisting through `persist`.
    pub fn new(manager: Arc<ConnectionManager>, persist: Option<PersistenceWriter>) -> Self {
        Self {
            manager,
            persist,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Shared counters, for `/health`.
    pub fn stats_handle(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Current counters.
    pub fn stats(&self) -> IngestSnapshot {
        self.stats.snapshot()
    }

    /// Handle one raw message.
    ///
    /// Persistence is queued, not awaited, and a failing sink never stops the
    /// broadcast. Returns the number of sessions the frame was queued on.
    ///
    /// Updates to an existing alert are the exception: with a writer present
    /// they are pushed once the sink has applied them, built from the stored
    /// alert, and not at all if the sink refused a status regression. Those
    /// return `0` here.
    pub fn on_event(&self, channel: &str, payload: &[u8]) -> Result<usize, ParseError> {
        let _ = self.stats.received.fetch_add(1, Ordering::Relaxed);
        let event = match IngestedEvent::parse(channel, payload) {
            Ok(event) => event,
            Err(e) => {
                let _ = self.stats.parse_failures.fetch_add(1, Ordering::Relaxed);
                counter!(INGEST_PARSE_FAILURES_TOTAL).increment(1);
                warn!(channel, error = %e, "dropping unparseable bus message");
                return Err(e);
            }
        };
        let kind = event.kind().as_str();
        counter!(INGEST_EVENTS_TOTAL, "kind" => kind).increment(1);

        if let IngestedEvent::AlertRaised(alert) = &event {
            if alert.is_update {
                if let Some(deferred) = self.defer_update(alert) {
                    debug!(channel, alert_id = %alert.id, "alert update waits for the store");
                    return Ok(deferred);
                }
            }
        }

        if let Some(writer) = &self.persist {
            let job = match &event {
                IngestedEvent::SensorSample(sample) => Some(PersistJob::Sample(sample.clone())),
                // Updates were already offered through `defer_update`.
                IngestedEvent::AlertRaised(alert) if alert.is_update => None,
                IngestedEvent::AlertRaised(alert) => Some(PersistJob::Alert(alert.to_alert())),
                IngestedEvent::ProductionReport(_) => None,
            };
            if let Some(job) = job {
                let _ = writer.submit(job);
            }
        }

        let topic = event.topic();
        let recipients = fan_out(
            &self.manager,
            &self.stats,
            topic,
            OutboundMessage::for_event(&event),
        );
        debug!(channel, kind, topic, recipients, asset_id = ?event.asset_id(), "event ingested");
        Ok(recipients)
    }

    /// Hand an alert update to the writer and push it once stored.
    ///
    /// Returns `None` when there is no writer or the job was dropped; the
    /// caller then pushes the update as received.
    fn defer_update(&self, alert: &AlertRaised) -> Option<usize> {
        let receipt = self.persist.as_ref()?.submit_update(alert.to_alert())?;
        let manager = Arc::clone(&self.manager);
        let stats = Arc::clone(&self.stats);
        let fallback = OutboundMessage::new(MessageBody::AlertNotification {
            data: alert.update_data(),
        });
        let id = alert.id.clone();
        drop(tokio::spawn(async move {
            let message = match receipt.await {
                Ok(UpdateReceipt::Applied(stored)) => OutboundMessage::for_alert(&stored),
                Ok(UpdateReceipt::Unchanged) => {
                    debug!(alert_id = %id, "alert update changed nothing");
                    return;
                }
                Ok(UpdateReceipt::Rejected) => {
                    counter!(INGEST_UPDATES_REJECTED_TOTAL).increment(1);
                    warn!(alert_id = %id, "alert status regression not pushed");
                    return;
                }
                Ok(UpdateReceipt::Failed) | Err(_) => fallback,
            };
            let recipients = fan_out(&manager, &stats, apex_core::topics::ALERTS, message);
            debug!(alert_id = %id, recipients, "alert update pushed");
        }));
        Some(0)
    }

    /// Pull from `source` until it ends or `cancel` fires.
    #[instrument(skip_all)]
    pub async fn run<E: EventSource>(self, mut source: E, cancel: CancellationToken) {
        info!("ingestor started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = source.next() => match next {
                    Some(message) => {
                        let _ = self.on_event(&message.channel, &message.payload);
                    }
                    None => {
                        warn!("event source closed");
                        break;
                    }
                },
            }
        }
        info!(
            received = self.stats.received.load(Ordering::Relaxed),
            "ingestor stopped"
        );
    }
}

fn fan_out(
    manager: &ConnectionManager,
    stats: &IngestStats,
    topic: &str,
    message: OutboundMessage,
) -> usize {
    let recipients = manager.broadcast(topic, message);
    let _ = stats.broadcasts.fetch_add(1, Ordering::Relaxed);
    #[allow(clippy::cast_precision_loss)]
    histogram!(INGEST_BROADCAST_RECIPIENTS).record(recipients as f64);
    recipients
}

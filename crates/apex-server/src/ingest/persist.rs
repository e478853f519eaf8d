//! Background persistence writer.
//!
//! The ingestor hands jobs over a bounded channel and never waits on the
//! sink. A full channel drops the job. The writer task performs the sink
//! calls in order and invalidates the read cache after alert changes.
//! Alert updates can ask for an [`UpdateReceipt`] carrying the alert as
//! stored, so the pushed frame reflects the store rather than the message.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use apex_core::{Alert, SensorSample};
use apex_store::{PersistenceSink, ReadCache, StoreError, UpsertOutcome};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, ServerError};
use crate::metrics::{
    CACHE_INVALIDATION_FAILURES_TOTAL, CACHE_INVALIDATIONS_TOTAL, PERSIST_DROPPED_TOTAL,
    PERSIST_FAILURES_TOTAL,
};

/// Work for the writer.
#[derive(Clone, Debug)]
pub enum PersistJob {
    /// Store a sensor reading.
    Sample(SensorSample),
    /// Insert or advance an alert.
    Alert(Alert),
}

impl PersistJob {
    fn op(&self) -> &'static str {
        match self {
            Self::Sample(_) => "write_sample",
            Self::Alert(_) => "upsert_alert",
        }
    }
}

/// How the sink took an alert update.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateReceipt {
    /// The stored alert changed. Carries the alert as now stored.
    Applied(Alert),
    /// The stored alert already had the requested status.
    Unchanged,
    /// The update would have moved the status backwards.
    Rejected,
    /// The sink failed, so the stored state is unknown.
    Failed,
}

enum Command {
    Job {
        job: PersistJob,
        reply: Option<oneshot::Sender<UpdateReceipt>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Live persistence counters.
#[derive(Debug, Default)]
pub struct PersistStats {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl PersistStats {
    /// Point-in-time copy.
    pub fn snapshot(&self) -> PersistSnapshot {
        PersistSnapshot {
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Persistence counters as reported by `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSnapshot {
    /// Jobs the sink accepted.
    pub written: u64,
    /// Jobs the sink rejected.
    pub failed: u64,
    /// Jobs dropped because the queue was full or the writer had stopped.
    pub dropped: u64,
}

/// Cache entry to drop whenever the alert set changes.
#[derive(Clone)]
pub struct CacheInvalidation {
    /// The cache.
    pub cache: Arc<dyn ReadCache>,
    /// Key holding dashboard aggregates.
    pub key: String,
}

/// Handle to the writer task. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::Sender<Command>,
    stats: Arc<PersistStats>,
}

impl PersistenceWriter {
    /// Start the writer. It stops once every handle is dropped.
    pub fn spawn(
        sink: Arc<dyn PersistenceSink>,
        invalidation: Option<CacheInvalidation>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(PersistStats::default());
        let handle = tokio::spawn(run_writer(rx, sink, invalidation, Arc::clone(&stats)));
        (Self { tx, stats }, handle)
    }

    /// Queue a job without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, job: PersistJob) -> bool {
        self.enqueue(Command::Job { job, reply: None })
    }

    /// Queue an alert update and learn how the sink took it.
    ///
    /// Returns `None` if the job was dropped.
    pub fn submit_update(&self, alert: Alert) -> Option<oneshot::Receiver<UpdateReceipt>> {
        let (reply, receipt) = oneshot::channel();
        let queued = self.enqueue(Command::Job {
            job: PersistJob::Alert(alert),
            reply: Some(reply),
        });
        queued.then_some(receipt)
    }

    fn enqueue(&self, command: Command) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "writer stopped",
                };
                let _ = self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(PERSIST_DROPPED_TOTAL).increment(1);
                warn!(reason, "persistence job dropped");
                false
            }
        }
    }

    /// Resolve once every job queued before this call has been processed.
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| ServerError::WriterStopped)?;
        done_rx.await.map_err(|_| ServerError::WriterStopped)
    }

    /// Current counters.
    pub fn stats(&self) -> PersistSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for `/health`.
    pub fn stats_handle(&self) -> Arc<PersistStats> {
        Arc::clone(&self.stats)
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Command>,
    sink: Arc<dyn PersistenceSink>,
    invalidation: Option<CacheInvalidation>,
    stats: Arc<PersistStats>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Job { job, reply } => {
                let op = job.op();
                let outcome = match &job {
                    PersistJob::Sample(sample) => sink.write_sample(sample).await.map(|()| None),
                    PersistJob::Alert(alert) => sink.upsert_alert(alert).await.map(Some),
                };
                let receipt = match outcome {
                    Ok(outcome) => {
                        let _ = stats.written.fetch_add(1, Ordering::Relaxed);
                        let changed = outcome.is_some_and(UpsertOutcome::changed);
                        if changed {
                            if let Some(inv) = &invalidation {
                                invalidate(inv).await;
                            }
                        }
                        match &job {
                            PersistJob::Alert(alert) if changed && reply.is_some() => {
                                read_back(sink.as_ref(), alert).await
                            }
                            _ => UpdateReceipt::Unchanged,
                        }
                    }
                    Err(e) => {
                        let _ = stats.failed.fetch_add(1, Ordering::Relaxed);
                        counter!(PERSIST_FAILURES_TOTAL, "op" => op).increment(1);
                        warn!(op, error = %e, "persistence write failed");
                        if matches!(e, StoreError::InvalidTransition { .. }) {
                            UpdateReceipt::Rejected
                        } else {
                            UpdateReceipt::Failed
                        }
                    }
                };
                if let Some(reply) = reply {
                    let _ = reply.send(receipt);
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    info!("persistence writer stopped");
}

async fn read_back(sink: &dyn PersistenceSink, alert: &Alert) -> UpdateReceipt {
    match sink.find_alert(&alert.id).await {
        Ok(Some(stored)) => UpdateReceipt::Applied(stored),
        Ok(None) => {
            warn!(alert_id = %alert.id, "updated alert missing on read-back");
            UpdateReceipt::Failed
        }
        Err(e) => {
            warn!(alert_id = %alert.id, error = %e, "alert read-back failed");
            UpdateReceipt::Failed
        }
    }
}

async fn invalidate(inv: &CacheInvalidation) {
    match inv.cache.delete(&inv.key).await {
        Ok(removed) => {
            counter!(CACHE_INVALIDATIONS_TOTAL).increment(1);
            debug!(key = %inv.key, removed, "read cache invalidated");
        }
        Err(e) => {
            counter!(CACHE_INVALIDATION_FAILURES_TOTAL).increment(1);
            warn!(key = %inv.key, error = %e, "read cache invalidation failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use apex_core::{Alert, AlertId, SensorSample};
    use apex_store::{PersistenceSink, StoreError, UpsertOutcome};
    use async_trait::async_trait;

    /// Sink that rejects every write.
    #[derive(Default)]
    pub(crate) struct FailingPersistence {
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl PersistenceSink for FailingPersistence {
        async fn write_sample(&self, _sample: &SensorSample) -> apex_store::Result<()> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        async fn upsert_alert(&self, _alert: &Alert) -> apex_store::Result<UpsertOutcome> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("disk on fire".into()))
        }

        async fn find_alert(&self, _id: &AlertId) -> apex_store::Result<Option<Alert>> {
            Err(StoreError::Unavailable("disk on fire".into()))
        }
    }
}

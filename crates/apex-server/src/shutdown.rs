//! Ordered shutdown of the gateway.
//!
//! [`ShutdownCoordinator::run`] performs the whole sequence:
//!
//! 1. cancel the token, so `/ws` and `/ingest` answer 503, the HTTP
//!    listener stops and the ingestor leaves its loop
//! 2. disconnect every session; delivery loops drain per their policy
//! 3. wait for the ingest task
//! 4. flush the persistence writer and release its handle
//! 5. wait for delivery loops, then for the remaining tasks
//!
//! Each wait is bounded by the plan's timeout. Nothing guarantees zero loss.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ingest::{PersistSnapshot, PersistenceWriter};
use crate::websocket::ConnectionManager;

/// What a shutdown has to stop and drain.
pub struct ShutdownPlan {
    /// Sessions to disconnect.
    pub manager: Arc<ConnectionManager>,
    /// Ingest task, expected to exit once the token is cancelled.
    pub ingest: Option<JoinHandle<()>>,
    /// Writer to flush. Dropped afterwards so its task can finish.
    pub writer: Option<PersistenceWriter>,
    /// Tasks awaited last, such as the HTTP server and the writer task.
    pub tasks: Vec<JoinHandle<()>>,
    /// Bound on each wait.
    pub timeout: Duration,
}

/// Outcome of [`ShutdownCoordinator::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions disconnected by the shutdown.
    pub sessions_closed: usize,
    /// The ingest task exited in time.
    pub ingest_stopped: bool,
    /// Every queued persistence job was processed.
    pub flushed: bool,
    /// Every delivery loop exited in time.
    pub sessions_drained: bool,
    /// The remaining tasks finished in time.
    pub tasks_finished: bool,
    /// Writer counters after the flush.
    pub persisted: PersistSnapshot,
}

impl ShutdownReport {
    /// Whether every step finished within its timeout.
    pub fn is_clean(&self) -> bool {
        self.ingest_stopped && self.flushed && self.sessions_drained && self.tasks_finished
    }
}

/// Owns the shutdown token and the shutdown sequence.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Cancel the token. The listener, the ingestor and new upgrades see it.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run the full sequence described in the module docs.
    pub async fn run(&self, plan: ShutdownPlan) -> ShutdownReport {
        let ShutdownPlan {
            manager,
            ingest,
            writer,
            tasks,
            timeout,
        } = plan;
        info!(timeout_ms = millis(timeout), "shutting down");

        self.shutdown();
        let sessions_closed = manager.shutdown();

        let ingest_stopped = match ingest {
            Some(handle) => tokio::time::timeout(timeout, handle).await.is_ok(),
            None => true,
        };
        if !ingest_stopped {
            warn!("ingest task did not stop in time");
        }

        let (flushed, persisted) = match writer {
            Some(writer) => {
                let flushed = match tokio::time::timeout(timeout, writer.flush()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(error = %e, "persistence flush failed");
                        false
                    }
                    Err(_) => {
                        warn!("persistence flush timed out");
                        false
                    }
                };
                (flushed, writer.stats())
            }
            None => (true, PersistSnapshot::default()),
        };

        let sessions_drained = manager.wait_idle(timeout).await;
        if !sessions_drained {
            warn!("delivery loops still running after {timeout:?}");
        }

        let task_count = tasks.len();
        let tasks_finished = tokio::time::timeout(timeout, futures::future::join_all(tasks))
            .await
            .is_ok();
        if !tasks_finished {
            warn!(task_count, "tasks still running after {timeout:?}");
        }

        let report = ShutdownReport {
            sessions_closed,
            ingest_stopped,
            flushed,
            sessions_drained,
            tasks_finished,
            persisted,
        };
        info!(
            sessions_closed,
            written = persisted.written,
            failed = persisted.failed,
            dropped = persisted.dropped,
            clean = report.is_clean(),
            "shutdown complete"
        );
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//! Per-client session state: bounded outbound queue, topic set, lifecycle.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use apex_core::{OutboundMessage, SessionId};
use metrics::counter;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metrics::WS_QUEUE_DROPS_TOTAL;

/// Lifecycle of a [`ClientSession`].
///
/// `Connecting -> Open -> Closing -> Closed`. Only a failed handshake may go
/// straight from `Connecting` to `Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Transport accepted, handshake not finished.
    Connecting = 0,
    /// Receiving and delivering.
    Open = 1,
    /// Disconnect requested; delivery is winding down.
    Closing = 2,
    /// Delivery loop has exited. Terminal.
    Closed = 3,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// Result of [`ClientSession::enqueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended with room to spare.
    Queued,
    /// Appended after evicting the oldest queued frame.
    DroppedOldest,
    /// The session is closing; nothing was queued.
    Closed,
}

/// One connected dashboard client.
///
/// Many producers (fan-out, inbound handler) enqueue; the session's delivery
/// loop is the only consumer.
pub struct ClientSession {
    id: SessionId,
    capacity: usize,
    queue: Mutex<VecDeque<Arc<OutboundMessage>>>,
    notify: Notify,
    state: AtomicU8,
    topics: Mutex<HashSet<String>>,
    dropped: AtomicU64,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    closing: CancellationToken,
}

impl ClientSession {
    /// New session in `Connecting` with a queue of `capacity` frames (minimum 1).
    pub fn new(id: SessionId, capacity: usize) -> Self {
        let now = Instant::now();
        let capacity = capacity.max(1);
        Self {
            id,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            state: AtomicU8::new(SessionState::Connecting as u8),
            topics: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
            connected_at: now,
            last_seen: Mutex::new(now),
            closing: CancellationToken::new(),
        }
    }

    /// Session handle.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether `close()` has been called.
    pub fn is_closing(&self) -> bool {
        self.state() >= SessionState::Closing
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a frame, evicting the oldest when full. Never blocks.
    pub fn enqueue(&self, message: Arc<OutboundMessage>) -> EnqueueOutcome {
        let outcome = {
            let mut queue = self.queue.lock();
            if self.is_closing() {
                return EnqueueOutcome::Closed;
            }
            let evicted = if queue.len() >= self.capacity {
                queue.pop_front().is_some()
            } else {
                false
            };
            queue.push_back(message);
            if evicted {
                EnqueueOutcome::DroppedOldest
            } else {
                EnqueueOutcome::Queued
            }
        };
        if outcome == EnqueueOutcome::DroppedOldest {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(WS_QUEUE_DROPS_TOTAL).increment(1);
        }
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame. Returns `None` once the session is closing;
    /// frames still queued at that point are left for [`try_pop`](Self::try_pop).
    pub async fn next(&self) -> Option<Arc<OutboundMessage>> {
        loop {
            let notified = self.notify.notified();
            if self.is_closing() {
                return None;
            }
            if let Some(message) = self.queue.lock().pop_front() {
                return Some(message);
            }
            notified.await;
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<Arc<OutboundMessage>> {
        self.queue.lock().pop_front()
    }

    /// Frames waiting for delivery.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// `Connecting -> Open`. Returns `false` from any other state.
    pub fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closing` and wake the delivery loop.
    ///
    /// Returns `false` if the session was already closing or closed.
    pub fn close(&self) -> bool {
        let moved = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (SessionState::from_u8(raw) < SessionState::Closing)
                    .then_some(SessionState::Closing as u8)
            })
            .is_ok();
        if moved {
            self.topics.lock().clear();
            self.closing.cancel();
            self.notify.notify_one();
        }
        moved
    }

    /// Terminal transition, once the delivery loop has exited.
    pub fn mark_closed(&self) {
        self.state.store(SessionState::Closed as u8, Ordering::Release);
        self.closing.cancel();
    }

    /// Resolves once [`close`](Self::close) or [`mark_closed`](Self::mark_closed) ran.
    pub async fn closed(&self) {
        self.closing.cancelled().await;
    }

    /// Record inbound activity.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or since connect).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames evicted by drop-oldest so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Topics this session is subscribed to.
    pub fn subscribed_topics(&self) -> HashSet<String> {
        self.topics.lock().clone()
    }

    pub(crate) fn add_topic(&self, topic: &str) {
        let _ = self.topics.lock().insert(topic.to_owned());
    }

    pub(crate) fn remove_topic(&self, topic: &str) {
        let _ = self.topics.lock().remove(topic);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

//! Connection manager: the session set, the topic registry, and fan-out.
//!
//! Both maps live behind one `RwLock`. Mutations take the write lock;
//! broadcast snapshots its targets under the read lock and enqueues after
//! releasing it, so fan-out never observes a half-applied change and never
//! holds the lock while touching a session queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use apex_core::{ClientFrame, FrameError, OutboundMessage, SessionId, SubscriptionStatus};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::errors::HandshakeError;
use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_FRAMES_IGNORED_TOTAL, WS_HANDSHAKE_FAILURES_TOTAL, WS_SEND_FAILURES_TOTAL,
};
use crate::websocket::delivery::{DeliveryConfig, DeliveryExit, FrameSink, run_delivery_loop};
use crate::websocket::session::{ClientSession, EnqueueOutcome};
use crate::websocket::topics::TopicRegistry;

/// Connection manager settings.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Sessions admitted at once.
    pub max_connections: usize,
    /// Per-session queue capacity.
    pub queue_capacity: usize,
    /// Delivery loop settings.
    pub delivery: DeliveryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            queue_capacity: 256,
            delivery: DeliveryConfig::default(),
        }
    }
}

/// What [`ConnectionManager::handle_inbound`] did with a frame.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Recognized and applied.
    Handled(ClientFrame),
    /// Malformed or unknown; the session is unaffected.
    Ignored(FrameError),
    /// The session is no longer registered.
    SessionGone,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Arc<ClientSession>>,
    topics: TopicRegistry,
}

/// Owns every live [`ClientSession`] and the [`TopicRegistry`].
pub struct ConnectionManager {
    registry: RwLock<Registry>,
    config: ManagerConfig,
    tracker: TaskTracker,
    accepting: AtomicBool,
}

impl ConnectionManager {
    /// Create an empty manager.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            config,
            tracker: TaskTracker::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Whether a new session would be admitted right now.
    pub fn check_admission(&self) -> Result<(), HandshakeError> {
        self.admit(self.registry.read().sessions.len())
    }

    fn admit(&self, live: usize) -> Result<(), HandshakeError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(HandshakeError::ShuttingDown);
        }
        if live >= self.config.max_connections {
            return Err(HandshakeError::AtCapacity {
                limit: self.config.max_connections,
            });
        }
        Ok(())
    }

    /// Register a transport as a new session and start its delivery loop.
    ///
    /// The welcome frame is the first thing queued. On rejection the
    /// transport is closed and no session exists.
    pub async fn accept<S: FrameSink>(
        self: &Arc<Self>,
        mut sink: S,
    ) -> Result<Arc<ClientSession>, HandshakeError> {
        let admitted = {
            let mut registry = self.registry.write();
            self.admit(registry.sessions.len()).map(|()| {
                let session = Arc::new(ClientSession::new(
                    SessionId::new(),
                    self.config.queue_capacity,
                ));
                let _ = registry
                    .sessions
                    .insert(session.id().clone(), Arc::clone(&session));
                session
            })
        };

        let session = match admitted {
            Ok(session) => session,
            Err(e) => {
                counter!(WS_HANDSHAKE_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
                warn!(reason = e.reason(), "rejecting websocket session");
                let limit = self.config.delivery.send_timeout;
                if tokio::time::timeout(limit, sink.close()).await.is_err() {
                    debug!("closing rejected transport timed out");
                }
                return Err(e);
            }
        };

        let _ = session.mark_open();
        let _ = session.enqueue(Arc::new(OutboundMessage::welcome()));
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(session_id = %session.id(), "session opened");

        let manager: Weak<Self> = Arc::downgrade(self);
        let task_session = Arc::clone(&session);
        let delivery = self.config.delivery.clone();
        let _ = self.tracker.spawn(async move {
            let exit = run_delivery_loop(&task_session, &mut sink, &delivery).await;
            match &exit {
                DeliveryExit::Closed => debug!(session_id = %task_session.id(), "delivery finished"),
                DeliveryExit::TransportFailed(e) => {
                    counter!(WS_SEND_FAILURES_TOTAL, "cause" => e.cause()).increment(1);
                    warn!(session_id = %task_session.id(), error = %e, "transport write failed");
                }
                DeliveryExit::HeartbeatTimeout => {
                    counter!(WS_SEND_FAILURES_TOTAL, "cause" => "heartbeat").increment(1);
                    warn!(session_id = %task_session.id(), "heartbeat timeout");
                }
            }
            if let Some(manager) = manager.upgrade() {
                let _ = manager.disconnect(task_session.id());
            }
            task_session.mark_closed();
        });

        Ok(session)
    }

    /// Apply one client frame.
    pub fn handle_inbound(&self, id: &SessionId, raw: &str) -> InboundOutcome {
        let Some(session) = self.session(id) else {
            return InboundOutcome::SessionGone;
        };
        session.mark_alive();

        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                counter!(WS_FRAMES_IGNORED_TOTAL).increment(1);
                debug!(session_id = %id, error = %e, "ignoring client frame");
                return InboundOutcome::Ignored(e);
            }
        };

        let reply = match &frame {
            ClientFrame::Subscribe(topic) => {
                {
                    let mut registry = self.registry.write();
                    if !registry.sessions.contains_key(id) {
                        return InboundOutcome::SessionGone;
                    }
                    let _ = registry.topics.subscribe(id, topic);
                    session.add_topic(topic);
                }
                debug!(session_id = %id, topic = %topic, "subscribed");
                OutboundMessage::subscription(SubscriptionStatus::Subscribed, topic.as_str())
            }
            ClientFrame::Unsubscribe(topic) => {
                {
                    let mut registry = self.registry.write();
                    if !registry.sessions.contains_key(id) {
                        return InboundOutcome::SessionGone;
                    }
                    let _ = registry.topics.unsubscribe(id, topic);
                    session.remove_topic(topic);
                }
                debug!(session_id = %id, topic = %topic, "unsubscribed");
                OutboundMessage::subscription(SubscriptionStatus::Unsubscribed, topic.as_str())
            }
            ClientFrame::Ping => OutboundMessage::pong(),
        };
        let _ = session.enqueue(Arc::new(reply));
        InboundOutcome::Handled(frame)
    }

    /// Remove a session everywhere and close it. Idempotent.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub fn disconnect(&self, id: &SessionId) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let removed = registry.sessions.remove(id);
            if removed.is_some() {
                let _ = registry.topics.remove_session(id);
            }
            removed
        };
        let Some(session) = removed else {
            return false;
        };
        let _ = session.close();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(
            session_id = %id,
            dropped = session.dropped_count(),
            age_ms = u64::try_from(session.age().as_millis()).unwrap_or(u64::MAX),
            "session closed"
        );
        true
    }

    /// Enqueue `message` on every subscriber of `topic`.
    ///
    /// Returns how many sessions accepted it.
    pub fn broadcast(&self, topic: &str, message: OutboundMessage) -> usize {
        let targets: Vec<Arc<ClientSession>> = {
            let registry = self.registry.read();
            registry
                .topics
                .iter_subscribers(topic)
                .filter_map(|id| registry.sessions.get(id).cloned())
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }
        let message = Arc::new(message);
        targets
            .iter()
            .filter(|s| s.enqueue(Arc::clone(&message)) != EnqueueOutcome::Closed)
            .count()
    }

    /// Live sessions.
    pub fn session_count(&self) -> usize {
        self.registry.read().sessions.len()
    }

    /// Topics in the registry, empty ones included.
    pub fn topic_count(&self) -> usize {
        self.registry.read().topics.topic_count()
    }

    /// Topics that currently have a subscriber.
    pub fn active_topic_count(&self) -> usize {
        self.registry.read().topics.active_topic_count()
    }

    /// Subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.registry.read().topics.subscriber_count(topic)
    }

    /// Look up a live session.
    pub fn session(&self, id: &SessionId) -> Option<Arc<ClientSession>> {
        self.registry.read().sessions.get(id).cloned()
    }

    /// Whether new sessions are admitted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Refuse new sessions and disconnect every live one.
    ///
    /// Returns how many were disconnected.
    pub fn shutdown(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        let ids: Vec<SessionId> = self.registry.read().sessions.keys().cloned().collect();
        let closed = ids.iter().filter(|id| self.disconnect(id)).count();
        info!(closed, "connection manager shut down");
        closed
    }

    /// Wait for every delivery loop to exit. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let _ = self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

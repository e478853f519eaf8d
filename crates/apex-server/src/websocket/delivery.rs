//! Per-session delivery loop.
//!
//! Drains one session's queue onto its transport. Every write is bounded by
//! the send timeout, so a stuck client only ever stalls its own loop.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::websocket::session::ClientSession;

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Write half of a client transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    /// Send a transport-level ping.
    async fn send_ping(&mut self) -> Result<(), TransportError>;
    /// Close the transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.send(Message::Ping(Bytes::new())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self).await?;
        Ok(())
    }
}

/// What to do with queued frames once a session is closing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Discard them and close at once.
    Immediate,
    /// Keep sending until the queue is empty or `deadline` passes.
    Flush {
        /// Upper bound on the whole drain.
        deadline: Duration,
    },
}

/// Delivery loop settings.
#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    /// Upper bound on one transport write.
    pub send_timeout: Duration,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Inbound silence that ends the session.
    pub heartbeat_timeout: Duration,
    /// Behavior on close.
    pub drain: DrainPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            drain: DrainPolicy::Flush {
                deadline: Duration::from_millis(500),
            },
        }
    }
}

/// Why a delivery loop stopped.
#[derive(Debug)]
pub enum DeliveryExit {
    /// The session was closed.
    Closed,
    /// A write failed or timed out.
    TransportFailed(TransportError),
    /// The client went silent for longer than the heartbeat timeout.
    HeartbeatTimeout,
}

async fn bounded<F>(limit: Duration, fut: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}

async fn deliver<S: FrameSink>(
    sink: &mut S,
    session: &ClientSession,
    message: &apex_core::OutboundMessage,
    limit: Duration,
) -> Result<(), TransportError> {
    match message.to_json() {
        Ok(text) => bounded(limit, sink.send_text(text)).await,
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "failed to serialize outbound frame");
            Ok(())
        }
    }
}

/// Run until the session closes, a write fails, or the heartbeat lapses.
///
/// Always closes `sink` before returning. Only a `Closed` exit drains the
/// queue, and only under [`DrainPolicy::Flush`].
pub async fn run_delivery_loop<S: FrameSink>(
    session: &ClientSession,
    sink: &mut S,
    config: &DeliveryConfig,
) -> DeliveryExit {
    let period = config.heartbeat_interval.max(MIN_HEARTBEAT);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            next = session.next() => match next {
                Some(message) => {
                    if let Err(e) = deliver(sink, session, &message, config.send_timeout).await {
                        break DeliveryExit::TransportFailed(e);
                    }
                }
                None => break DeliveryExit::Closed,
            },
            _ = heartbeat.tick() => {
                if session.idle_for() >= config.heartbeat_timeout {
                    break DeliveryExit::HeartbeatTimeout;
                }
                if let Err(e) = bounded(config.send_timeout, sink.send_ping()).await {
                    break DeliveryExit::TransportFailed(e);
                }
            }
        }
    };

    if matches!(exit, DeliveryExit::Closed) {
        if let DrainPolicy::Flush { deadline } = config.drain {
            let drain = async {
                let mut sent = 0usize;
                while let Some(message) = session.try_pop() {
                    deliver(sink, session, &message, config.send_timeout).await?;
                    sent += 1;
                }
                Ok::<_, TransportError>(sent)
            };
            match tokio::time::timeout(deadline, drain).await {
                Ok(Ok(sent)) => debug!(session_id = %session.id(), sent, "drained queue"),
                Ok(Err(e)) => debug!(session_id = %session.id(), error = %e, "drain aborted"),
                Err(_) => debug!(
                    session_id = %session.id(),
                    left = session.queued(),
                    "drain deadline reached"
                ),
            }
        }
    }

    if let Err(e) = bounded(config.send_timeout, sink.close()).await {
        debug!(session_id = %session.id(), error = %e, "transport close failed");
    }
    exit
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use apex_core::{OutboundMessage, SessionId};
    use assert_matches::assert_matches;

    use super::*;
    use crate::websocket::test_support::{HangingSink, SinkEvent, channel_sink};

    fn open_session(capacity: usize) -> Arc<ClientSession> {
        let s = Arc::new(ClientSession::new(SessionId::new(), capacity));
        let _ = s.mark_open();
        s
    }

    #[tokio::test]
    async fn delivers_in_fifo_order_then_closes() {
        let session = open_session(8);
        let (mut sink, mut rx) = channel_sink();
        let _ = session.enqueue(Arc::new(OutboundMessage::welcome()));
        let _ = session.enqueue(Arc::new(OutboundMessage::pong()));

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                run_delivery_loop(&session, &mut sink, &DeliveryConfig::default()).await
            })
        };

        assert_matches!(rx.recv().await, Some(SinkEvent::Text(t)) if t.contains("\"connection\""));
        assert_matches!(rx.recv().await, Some(SinkEvent::Text(t)) if t.contains("\"pong\""));
        let _ = session.close();
        assert_matches!(task.await.unwrap(), DeliveryExit::Closed);
        assert_matches!(rx.recv().await, Some(SinkEvent::Close));
    }

    #[tokio::test]
    async fn flush_drains_queued_frames() {
        let session = open_session(8);
        let _ = session.enqueue(Arc::new(OutboundMessage::welcome()));
        let _ = session.enqueue(Arc::new(OutboundMessage::pong()));
        let _ = session.close();

        let (mut sink, mut rx) = channel_sink();
        let exit = run_delivery_loop(&session, &mut sink, &DeliveryConfig::default()).await;
        assert_matches!(exit, DeliveryExit::Closed);
        assert_matches!(rx.recv().await, Some(SinkEvent::Text(_)));
        assert_matches!(rx.recv().await, Some(SinkEvent::Text(_)));
        assert_matches!(rx.recv().await, Some(SinkEvent::Close));
    }

    #[tokio::test]
    async fn immediate_discards_queued_frames() {
        let session = open_session(8);
        let _ = session.enqueue(Arc::new(OutboundMessage::welcome()));
        let _ = session.close();

        let (mut sink, mut rx) = channel_sink();
        let config = DeliveryConfig {
            drain: DrainPolicy::Immediate,
            ..DeliveryConfig::default()
        };
        let _ = run_delivery_loop(&session, &mut sink, &config).await;
        assert_matches!(rx.recv().await, Some(SinkEvent::Close));
        assert_eq!(session.queued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_write_times_out() {
        let session = open_session(8);
        let _ = session.enqueue(Arc::new(OutboundMessage::welcome()));
        let mut sink = HangingSink;
        let config = DeliveryConfig {
            send_timeout: Duration::from_millis(200),
            ..DeliveryConfig::default()
        };
        let exit = run_delivery_loop(&session, &mut sink, &config).await;
        assert_matches!(exit, DeliveryExit::TransportFailed(TransportError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_hits_heartbeat_timeout() {
        let session = open_session(8);
        let (mut sink, mut rx) = channel_sink();
        let config = DeliveryConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
            ..DeliveryConfig::default()
        };
        let exit = run_delivery_loop(&session, &mut sink, &config).await;
        assert_matches!(exit, DeliveryExit::HeartbeatTimeout);
        assert_matches!(rx.recv().await, Some(SinkEvent::Ping));
        assert_matches!(rx.recv().await, Some(SinkEvent::Ping));
        assert_matches!(rx.recv().await, Some(SinkEvent::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_keeps_session_alive() {
        let session = open_session(8);
        let (mut sink, mut rx) = channel_sink();
        let config = DeliveryConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
            ..DeliveryConfig::default()
        };
        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { run_delivery_loop(&session, &mut sink, &config).await })
        };
        for _ in 0..5 {
            assert_matches!(rx.recv().await, Some(SinkEvent::Ping));
            session.mark_alive();
        }
        let _ = session.close();
        assert_matches!(task.await.unwrap(), DeliveryExit::Closed);
    }
}

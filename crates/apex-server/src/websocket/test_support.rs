//! In-memory transports for session and manager tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::websocket::delivery::FrameSink;

pub(crate) const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) enum SinkEvent {
    Text(String),
    Ping,
    Close,
}

/// Forwards every write to a channel.
pub(crate) struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

pub(crate) fn channel_sink() -> (ChannelSink, mpsc::UnboundedReceiver<SinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, rx)
}

impl ChannelSink {
    fn push(&self, event: SinkEvent) -> Result<(), TransportError> {
        self.tx.send(event).map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(SinkEvent::Text(text))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(SinkEvent::Ping)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.push(SinkEvent::Close)
    }
}

/// Every write blocks forever.
pub(crate) struct HangingSink;

#[async_trait]
impl FrameSink for HangingSink {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Every write fails; counts attempts.
#[derive(Clone, Default)]
pub(crate) struct FailingSink {
    pub(crate) attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameSink for FailingSink {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Closed)
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Next text frame as JSON, skipping pings. Panics on close or timeout.
pub(crate) async fn next_json(rx: &mut mpsc::UnboundedReceiver<SinkEvent>) -> Value {
    loop {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("sink channel closed");
        match event {
            SinkEvent::Text(text) => return serde_json::from_str(&text).expect("frame is JSON"),
            SinkEvent::Ping => {}
            SinkEvent::Close => panic!("transport closed while waiting for a frame"),
        }
    }
}

/// Assert nothing but pings arrives within `wait`.
pub(crate) async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<SinkEvent>, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Err(_) => return,
            Ok(Some(SinkEvent::Ping)) => {}
            Ok(other) => panic!("unexpected sink event {other:?}"),
        }
    }
}

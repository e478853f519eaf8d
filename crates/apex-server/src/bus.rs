//! In-process publish/subscribe bus feeding the ingestor.
//!
//! Channels are `/`-separated paths such as `sensors/line-a/temp`.
//! Subscriptions use MQTT-style filters: `+` matches exactly one segment,
//! a trailing `#` matches the rest (including nothing).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::FilterError;

/// One raw message on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel it was published on.
    pub channel: String,
    /// Raw payload, expected to be JSON.
    pub payload: Bytes,
}

/// A parsed channel filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelFilter {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Single,
    Rest,
}

impl ChannelFilter {
    /// Parse a filter like `sensors/#` or `alerts/+/critical`.
    pub fn parse(raw: &str) -> Result<Self, FilterError> {
        let invalid = |reason| FilterError {
            filter: raw.to_owned(),
            reason,
        };
        if raw.is_empty() {
            return Err(invalid("filter is empty"));
        }
        let parts: Vec<&str> = raw.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "#" if i == last => Segment::Rest,
                "#" => return Err(invalid("'#' must be the last segment")),
                "+" => Segment::Single,
                p if p.contains(['#', '+']) => {
                    return Err(invalid("wildcards must occupy a whole segment"));
                }
                p => Segment::Literal(p.to_owned()),
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    /// The filter as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `channel` matches.
    pub fn matches(&self, channel: &str) -> bool {
        let mut parts = channel.split('/');
        for segment in &self.segments {
            match segment {
                Segment::Rest => return true,
                Segment::Single => {
                    if parts.next().is_none() {
                        return false;
                    }
                }
                Segment::Literal(lit) => {
                    if parts.next() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }
}

struct Subscriber {
    filters: Vec<ChannelFilter>,
    tx: mpsc::Sender<BusMessage>,
}

/// Bounded fan-out bus. Publishing never waits; a full subscriber loses the message.
#[derive(Clone)]
pub struct MessageBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    capacity: usize,
}

impl MessageBus {
    /// Create a bus whose subscriptions each buffer `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to every channel matching any of `filters`.
    pub fn subscribe<I, S>(&self, filters: I) -> Result<BusSubscription, FilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filters = filters
            .into_iter()
            .map(|f| ChannelFilter::parse(f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let (tx, rx) = mpsc::channel(self.capacity);
        debug!(
            filters = ?filters.iter().map(ChannelFilter::as_str).collect::<Vec<_>>(),
            "bus subscription added"
        );
        self.subscribers.write().push(Subscriber {
            filters: filters.clone(),
            tx,
        });
        Ok(BusSubscription { filters, rx })
    }

    /// Deliver to every matching subscription. Returns how many took it.
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> usize {
        let message = BusMessage {
            channel: channel.to_owned(),
            payload: payload.into(),
        };
        let mut delivered = 0;
        let mut saw_closed = false;
        {
            let subscribers = self.subscribers.read();
            for sub in subscribers
                .iter()
                .filter(|s| s.filters.iter().any(|f| f.matches(channel)))
            {
                match sub.tx.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(channel, "bus subscriber full, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => saw_closed = true,
                }
            }
        }
        if saw_closed {
            self.subscribers.write().retain(|s| !s.tx.is_closed());
        }
        delivered
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().iter().filter(|s| !s.tx.is_closed()).count()
    }
}

/// Receiving end of a [`MessageBus::subscribe`] call.
pub struct BusSubscription {
    filters: Vec<ChannelFilter>,
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Filters this subscription was created with.
    pub fn filters(&self) -> &[ChannelFilter] {
        &self.filters
    }
}

/// Something the ingestor can pull raw messages from.
#[async_trait]
pub trait EventSource: Send {
    /// Next message, or `None` once the source is exhausted.
    async fn next(&mut self) -> Option<BusMessage>;
}

#[async_trait]
impl EventSource for BusSubscription {
    async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

//! WebSocket wire protocol.
//!
//! Server frames are JSON objects tagged by `type` and stamped with
//! `timestamp`. Client frames carry an `action` and, for subscription
//! changes, a `topic`.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::alert::Alert;
use crate::event::{EventKind, IngestedEvent};
use crate::topics;

/// Status carried by the welcome frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The session is open.
    Connected,
}

/// Status carried by a subscription acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// The session now receives the topic.
    Subscribed,
    /// The session no longer receives the topic.
    Unsubscribed,
}

/// Body of a server frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    /// First frame of every session.
    #[serde(rename = "connection")]
    Welcome {
        /// Always [`ConnectionStatus::Connected`].
        status: ConnectionStatus,
    },
    /// Reply to a subscribe or unsubscribe request.
    #[serde(rename = "subscription")]
    SubscriptionAck {
        /// Outcome.
        status: SubscriptionStatus,
        /// Topic the request named.
        topic: String,
    },
    /// Reply to an application-level ping.
    #[serde(rename = "pong")]
    Pong,
    /// A sensor reading.
    #[serde(rename = "sensor_data")]
    SensorUpdate {
        /// The reading as received.
        data: Value,
    },
    /// An alert was raised or updated.
    #[serde(rename = "alert")]
    AlertNotification {
        /// Alert summary.
        data: Value,
    },
    /// A production report.
    #[serde(rename = "production")]
    ProductionUpdate {
        /// The report as received.
        data: Value,
    },
}

/// A frame sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Tagged body.
    #[serde(flatten)]
    pub body: MessageBody,
    /// When the frame was created.
    pub timestamp: DateTime<Utc>,
}

impl OutboundMessage {
    /// Stamp `body` with the current time.
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
        }
    }

    /// The welcome frame.
    pub fn welcome() -> Self {
        Self::new(MessageBody::Welcome {
            status: ConnectionStatus::Connected,
        })
    }

    /// Subscription acknowledgement.
    pub fn subscription(status: SubscriptionStatus, topic: impl Into<String>) -> Self {
        Self::new(MessageBody::SubscriptionAck {
            status,
            topic: topic.into(),
        })
    }

    /// Pong frame.
    pub fn pong() -> Self {
        Self::new(MessageBody::Pong)
    }

    /// Push frame for an ingested event.
    pub fn for_event(event: &IngestedEvent) -> Self {
        let data = event.push_data();
        let body = match event.kind() {
            EventKind::SensorSample => MessageBody::SensorUpdate { data },
            EventKind::AlertRaised => MessageBody::AlertNotification { data },
            EventKind::ProductionReport => MessageBody::ProductionUpdate { data },
        };
        Self::new(body)
    }

    /// Alert frame built from a stored alert.
    pub fn for_alert(alert: &Alert) -> Self {
        Self::new(MessageBody::AlertNotification {
            data: alert.summary(),
        })
    }

    /// Serialize to the JSON text sent on the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A recognized client request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientFrame {
    /// Start receiving a topic.
    Subscribe(String),
    /// Stop receiving a topic.
    Unsubscribe(String),
    /// Liveness check.
    Ping,
}

/// Why an inbound frame was ignored.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Not JSON, or not an object.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `action` missing or not understood.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// Subscription change without a usable topic.
    #[error("missing or invalid topic")]
    InvalidTopic,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    topic: Option<String>,
}

impl ClientFrame {
    /// Parse an inbound text frame. Topics are normalized.
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(FrameError::Malformed(serde_json::Error::custom(
                "expected a JSON object",
            )));
        }
        let frame: RawFrame = serde_json::from_value(value)?;
        let action = frame.action.unwrap_or_default();
        let topic = || {
            frame
                .topic
                .as_deref()
                .and_then(topics::normalize)
                .map(str::to_owned)
                .ok_or(FrameError::InvalidTopic)
        };
        match action.as_str() {
            "subscribe" => Ok(Self::Subscribe(topic()?)),
            "unsubscribe" => Ok(Self::Unsubscribe(topic()?)),
            "ping" => Ok(Self::Ping),
            _ => Err(FrameError::UnknownAction(action)),
        }
    }
}

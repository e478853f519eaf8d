//! # apex-core
//!
//! Shared vocabulary for the Apex telemetry gateway:
//!
//! - **IDs**: `SessionId` and `AlertId` newtypes
//! - **Alerts**: `Alert` entity and the forward-only `AlertStatus` lifecycle
//! - **Events**: `IngestedEvent`, normalized from raw bus messages
//! - **Wire protocol**: `OutboundMessage` server frames and `ClientFrame` requests
//! - **Logging**: `init_subscriber` for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod alert;
pub mod event;
pub mod ids;
pub mod logging;
pub mod message;
pub mod topics;

pub use alert::{Alert, AlertSeverity, AlertStatus, UnknownVariant};
pub use event::{
    AlertRaised, EventKind, IngestedEvent, ParseError, ProductionReport, SensorSample,
};
pub use ids::{AlertId, SessionId};
pub use message::{
    ClientFrame, ConnectionStatus, FrameError, MessageBody, OutboundMessage, SubscriptionStatus,
};

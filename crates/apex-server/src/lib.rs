//! # apex-server
//!
//! The real-time core of the Apex gateway:
//!
//! - **Bus**: [`MessageBus`] with MQTT-style channel filters, fed by `POST /ingest`
//! - **Ingestion**: [`EventIngestor`] normalizes bus messages, queues them on the
//!   [`PersistenceWriter`], and fans them out
//! - **WebSocket**: [`ConnectionManager`] owns sessions and the topic registry;
//!   each session has a bounded drop-oldest queue drained by its own delivery loop
//! - **HTTP**: [`ApexServer`] serves `/ws`, `/health`, `/metrics` and `/ingest`

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod errors;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use bus::{BusMessage, BusSubscription, ChannelFilter, EventSource, MessageBus};
pub use config::ServerConfig;
pub use errors::{FilterError, HandshakeError, Result, ServerError, TransportError};
pub use ingest::{
    CacheInvalidation, EventIngestor, IngestSnapshot, IngestStats, PersistJob, PersistSnapshot,
    PersistStats, PersistenceWriter, UpdateReceipt,
};
pub use server::ApexServer;
pub use shutdown::{ShutdownCoordinator, ShutdownPlan, ShutdownReport};
pub use websocket::{
    ClientSession, ConnectionManager, DeliveryConfig, DrainPolicy, FrameSink, InboundOutcome,
    ManagerConfig, TopicRegistry,
};

//! WebSocket sessions, topic registry, fan-out and per-session delivery.

pub mod delivery;
pub mod handler;
pub mod manager;
pub mod session;
pub mod topics;

#[cfg(test)]
pub(crate) mod test_support;

pub use delivery::{DeliveryConfig, DeliveryExit, DrainPolicy, FrameSink, run_delivery_loop};
pub use handler::run_ws_session;
pub use manager::{ConnectionManager, InboundOutcome, ManagerConfig};
pub use session::{ClientSession, EnqueueOutcome, SessionState};
pub use topics::TopicRegistry;

//! Server configuration.

use std::time::Duration;

use apex_settings::{DrainMode, DrainSettings, ServerSettings};
use serde::{Deserialize, Serialize};

use crate::websocket::delivery::{DeliveryConfig, DrainPolicy};
use crate::websocket::manager::ManagerConfig;

/// Runtime configuration for [`ApexServer`](crate::server::ApexServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket sessions.
    pub max_connections: usize,
    /// Per-session outbound queue capacity.
    pub queue_capacity: usize,
    /// Upper bound on one transport write, in milliseconds.
    pub send_timeout_ms: u64,
    /// Ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a session is dropped, in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Drain policy for closing sessions.
    pub drain: DrainSettings,
    /// How long shutdown waits for tasks, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            drain: DrainSettings::default(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Build from the `server` settings section.
    pub fn from_settings(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            queue_capacity: s.queue_capacity,
            send_timeout_ms: s.send_timeout_ms,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            max_message_size: s.max_message_size,
            drain: s.drain.clone(),
            shutdown_timeout_secs: s.shutdown_timeout_secs,
        }
    }

    /// Shutdown wait as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Per-session delivery loop settings.
    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            drain: match self.drain.mode {
                DrainMode::Immediate => DrainPolicy::Immediate,
                DrainMode::Flush => DrainPolicy::Flush {
                    deadline: Duration::from_millis(self.drain.deadline_ms),
                },
            },
        }
    }

    /// Connection manager settings.
    pub fn manager(&self) -> ManagerConfig {
        ManagerConfig {
            max_connections: self.max_connections,
            queue_capacity: self.queue_capacity,
            delivery: self.delivery(),
        }
    }
}

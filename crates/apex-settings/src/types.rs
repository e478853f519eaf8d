//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is marked
//! `#[serde(default)]`, so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings for the gateway.
///
/// ```json
/// {
///   "server": { "port": 9000, "drain": { "mode": "immediate" } },
///   "storage": { "backend": "memory" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApexSettings {
    /// Network, session and shutdown settings.
    pub server: ServerSettings,
    /// Bus subscription and persistence queue settings.
    pub ingest: IngestSettings,
    /// Persistence backend.
    pub storage: StorageSettings,
    /// Read-side cache.
    pub cache: CacheSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Server network and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Upgrades beyond this many live sessions are refused.
    pub max_connections: usize,
    /// Per-session outbound queue capacity.
    pub queue_capacity: usize,
    /// Upper bound on a single transport write.
    pub send_timeout_ms: u64,
    /// Interval between transport-level pings.
    pub heartbeat_interval_secs: u64,
    /// A session silent for this long is disconnected.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// What a closing session does with its queued frames.
    pub drain: DrainSettings,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
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

/// Drain behavior when a session closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainMode {
    /// Send what is queued until the deadline, then close.
    #[default]
    Flush,
    /// Close without sending anything further.
    Immediate,
}

/// Drain policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainSettings {
    /// Policy.
    pub mode: DrainMode,
    /// Flush deadline in milliseconds. Ignored for [`DrainMode::Immediate`].
    pub deadline_ms: u64,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            mode: DrainMode::Flush,
            deadline_ms: 500,
        }
    }
}

/// Event ingestion settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Bus channel filters the ingestor subscribes to.
    pub channels: Vec<String>,
    /// Buffer size of each bus subscription.
    pub bus_capacity: usize,
    /// Persistence jobs buffered before new ones are dropped.
    pub persist_queue_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            channels: vec![
                "sensors/#".to_string(),
                "alerts/#".to_string(),
                "production/#".to_string(),
            ],
            bus_capacity: 1024,
            persist_queue_capacity: 4096,
        }
    }
}

/// Which persistence sink to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// `SQLite` file.
    #[default]
    Sqlite,
    /// Process memory; lost on restart.
    Memory,
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend.
    pub backend: StorageBackend,
    /// Database file. A leading `~/` expands to `$HOME`.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: "~/.apex/apex.db".to_string(),
            pool_size: 4,
        }
    }
}

/// Read-side cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default entry lifetime.
    pub ttl_secs: u64,
    /// Entry limit.
    pub max_entries: usize,
    /// Key holding the dashboard aggregate, invalidated on alert changes.
    pub dashboard_key: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 10,
            max_entries: 200,
            dashboard_key: "dashboard".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

//! # apex-gateway
//!
//! Apex gateway binary: loads settings, opens storage, and runs the bus,
//! ingestor, persistence writer and HTTP/WebSocket server until ctrl-c.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apex_server::metrics::PrometheusHandle;
use apex_server::{
    ApexServer, CacheInvalidation, ConnectionManager, EventIngestor, MessageBus,
    PersistenceWriter, ServerConfig, ShutdownPlan,
};
use apex_settings::{ApexSettings, StorageBackend, StorageSettings};
use apex_store::{ConnectionConfig, InMemoryTtlCache, MemorySink, PersistenceSink, SqliteSink};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::info;

/// Apex telemetry gateway.
#[derive(Parser, Debug)]
#[command(name = "apex-gateway", about = "Real-time telemetry ingestion and WebSocket fan-out")]
struct Cli {
    /// Settings file (default `~/.apex/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path (overrides settings).
    #[arg(long)]
    db_path: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut ApexSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.storage.db_path.clone_from(db_path);
        }
    }
}

fn load(cli: &Cli) -> Result<ApexSettings> {
    let path = cli.config.clone().unwrap_or_else(apex_settings::settings_path);
    let mut settings = apex_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);
    apex_settings::validate(&settings).context("invalid settings")?;
    Ok(settings)
}

fn open_sink(storage: &StorageSettings) -> Result<Arc<dyn PersistenceSink>> {
    match storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory persistence");
            Ok(Arc::new(MemorySink::new()))
        }
        StorageBackend::Sqlite => {
            let path = apex_settings::expand_home(&storage.db_path);
            let config = ConnectionConfig {
                pool_size: storage.pool_size,
                ..ConnectionConfig::default()
            };
            let sink = SqliteSink::open(&path, &config)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            info!(path = %path.display(), "sqlite persistence ready");
            Ok(Arc::new(sink))
        }
    }
}

/// A running gateway.
struct Gateway {
    addr: SocketAddr,
    server: ApexServer,
    writer: PersistenceWriter,
    writer_handle: JoinHandle<()>,
    ingest_handle: JoinHandle<()>,
    server_handle: JoinHandle<()>,
}

impl Gateway {
    async fn start(settings: &ApexSettings, metrics: PrometheusHandle) -> Result<Self> {
        let sink = open_sink(&settings.storage)?;
        let cache = Arc::new(InMemoryTtlCache::new(settings.cache.max_entries));
        let (writer, writer_handle) = PersistenceWriter::spawn(
            sink,
            Some(CacheInvalidation {
                cache,
                key: settings.cache.dashboard_key.clone(),
            }),
            settings.ingest.persist_queue_capacity,
        );

        let config = ServerConfig::from_settings(&settings.server);
        let manager = Arc::new(ConnectionManager::new(config.manager()));
        let bus = MessageBus::new(settings.ingest.bus_capacity);
        let source = bus
            .subscribe(&settings.ingest.channels)
            .context("invalid ingest channel filter")?;
        let ingestor = EventIngestor::new(Arc::clone(&manager), Some(writer.clone()));

        let server = ApexServer::new(config, manager, bus, metrics)
            .with_stats(ingestor.stats_handle(), writer.stats_handle());
        let ingest_handle = tokio::spawn(ingestor.run(source, server.shutdown().token()));
        let (addr, server_handle) = server.listen().await.context("failed to bind server")?;

        info!(
            %addr,
            channels = ?settings.ingest.channels,
            "apex gateway listening"
        );
        Ok(Self {
            addr,
            server,
            writer,
            writer_handle,
            ingest_handle,
            server_handle,
        })
    }

    /// Run the ordered shutdown. Returns `false` if any step timed out.
    async fn stop(self, timeout: Duration) -> bool {
        let plan = ShutdownPlan {
            manager: Arc::clone(self.server.manager()),
            ingest: Some(self.ingest_handle),
            writer: Some(self.writer),
            tasks: vec![self.server_handle, self.writer_handle],
            timeout,
        };
        self.server.shutdown().run(plan).await.is_clean()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    apex_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics = apex_server::metrics::install_recorder().context("failed to install metrics")?;
    let gateway = Gateway::start(&settings, metrics).await?;
    info!(addr = %gateway.addr, "press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let timeout = gateway.server.config().shutdown_timeout();
    let _ = gateway.stop(timeout).await;
    Ok(())
}

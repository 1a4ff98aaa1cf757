//! docshard-daemon: the multi-tenant document layer daemon.
//!
//! Single OS process running a Tokio async runtime. Clients talk to it via
//! line-delimited JSON-RPC over a Unix socket in the data directory.

mod commands;
mod config;
mod events;
mod rpc;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{error, info};

use docshard_db::SqliteStore;
use docshard_index::IndexSynthesizer;
use docshard_migrate::MigrationEngine;
use docshard_sequence::{NodeId, SequenceAllocator};

use crate::config::DaemonConfig;
use crate::events::EventBus;
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Database connection, shared with the engines' store.
    pub db: Arc<tokio::sync::Mutex<rusqlite::Connection>>,
    pub config: DaemonConfig,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    pub migrations: MigrationEngine,
    pub indexes: IndexSynthesizer,
    pub sequences: SequenceAllocator,
    pub started_at: Instant,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl DaemonState {
    /// Wire the engines to one SQLite store over `conn`.
    pub fn new(
        conn: rusqlite::Connection,
        config: DaemonConfig,
        node: NodeId,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(tokio::sync::Mutex::new(conn));
        let store = Arc::new(SqliteStore::from_shared(db.clone()));

        let migrations = MigrationEngine::new(store.clone(), store.clone(), config.migration.clone());
        let indexes = IndexSynthesizer::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.indexing.clone(),
        );
        let sequences = SequenceAllocator::new(store, node, config.sequence.clone())?;

        let event_bus = EventBus::new(config.advanced.event_buffer);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            db,
            config,
            event_bus,
            migrations,
            indexes,
            sequences,
            started_at: Instant::now(),
            shutdown_tx,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config (needed for the log level)
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.log_directive().parse()?),
        )
        .init();

    info!("docshard daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("docshard.db");
    let conn = docshard_db::open(&db_path)?;
    conn.busy_timeout(config.busy_timeout())?;

    // 3. Node identity for block reservations
    let node = NodeId::resolve(&config.sequence.node_id, &data_dir)?;
    info!(node = %node, "node identity resolved");

    // 4. Build daemon state
    let state = Arc::new(DaemonState::new(conn, config, node)?);
    let shutdown_tx = state.shutdown_tx.clone();

    // 5. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    state.event_bus.emit(
        "DaemonStarted",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "node_id": state.sequences.node(),
        }),
    );

    // 6. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    info!("Daemon shutting down gracefully");

    // Let in-flight block reservations land before the store goes away.
    state.sequences.wait_for_preallocations().await;

    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}

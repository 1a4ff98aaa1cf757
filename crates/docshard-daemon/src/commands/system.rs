//! Daemon-level command handlers.

use std::sync::Arc;

use serde_json::{json, Value};

use super::Result;
use crate::DaemonState;

pub async fn status(state: &Arc<DaemonState>) -> Result {
    let config = &state.config;
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": state.sequences.node(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "event_sequence": state.event_bus.sequence(),
        "sequence_keys": state.sequences.block_statuses().len(),
        "config": {
            "data_dir": config.data_dir(),
            "block_size": config.sequence.block_size,
            "prealloc_threshold": config.sequence.prealloc_threshold,
            "migration_batch_size": config.migration.batch_size,
            "ddl_timeout_secs": config.indexing.ddl_timeout_secs,
        },
    }))
}

pub async fn shutdown(state: &Arc<DaemonState>) -> Result {
    tracing::info!("shutdown requested over IPC");
    // No receiver just means the daemon is already stopping.
    let _ = state.shutdown_tx.send(());
    Ok(json!({"status": "shutting_down"}))
}

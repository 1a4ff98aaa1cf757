//! Virtual index command handlers.

use std::sync::Arc;

use serde_json::{json, Value};

use docshard_db::queries::{indexes, schemas};
use docshard_index::IndexDefinition;
use docshard_types::CollectionName;

use super::{optional, required, scope, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Reconcile indexes against the active schema.
pub async fn sync(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let active = {
        let db = state.db.lock().await;
        schemas::active(&db, &tenant, &collection)?
    }
    .ok_or_else(|| {
        RpcError::schema_not_found(&format!("{tenant}/{collection} has no active schema"))
    })?;

    let report = state
        .indexes
        .sync_indexes_for_schema(&tenant, &collection, &active)
        .await?;
    state.event_bus.emit(
        "IndexesSynced",
        json!({
            "tenant": tenant,
            "collection": collection,
            "version": active.version,
            "created": report.created,
            "dropped": report.dropped,
            "failed": report.failed.len(),
        }),
    );
    to_value(&report)
}

/// Create one index outside of a schema publish.
pub async fn create(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let definition: IndexDefinition = required(params, "definition")?;
    let index = state
        .indexes
        .create_virtual_index(&tenant, &collection, definition)
        .await?;
    state.event_bus.emit(
        "IndexCreated",
        json!({
            "tenant": tenant,
            "collection": collection,
            "name": index.name,
            "physical_name": index.physical_name,
        }),
    );
    to_value(&index)
}

pub async fn drop(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let name: String = required(params, "name")?;
    let index = state
        .indexes
        .drop_virtual_index(&tenant, &collection, &name)
        .await?;
    state.event_bus.emit(
        "IndexDropped",
        json!({
            "tenant": tenant,
            "collection": collection,
            "name": index.name,
            "physical_name": index.physical_name,
        }),
    );
    to_value(&index)
}

/// Live indexes of a tenant, optionally narrowed to one collection.
pub async fn list(state: &Arc<DaemonState>, params: &Value) -> Result {
    let tenant = required(params, "tenant")?;
    let collection: Option<CollectionName> = optional(params, "collection")?;
    let live = state
        .indexes
        .list_indexes_for_client(&tenant, collection.as_ref())
        .await?;
    to_value(&live)
}

/// Every index row of a collection, dropped ones included.
pub async fn history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let db = state.db.lock().await;
    let rows = indexes::history(&db, &tenant, &collection)?;
    to_value(&rows)
}

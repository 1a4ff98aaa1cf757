//! Migration and document command handlers.

use std::sync::Arc;

use serde_json::{json, Value};

use docshard_db::queries::{documents, schemas};
use docshard_migrate::MigrationOutcome;
use docshard_types::{now_secs, CollectionName, CollectionSchema, TableName, TenantId};

use super::{optional, required, scope, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

const DEFAULT_PREVIEW_SAMPLE: usize = 10;

/// The requested version, or the active one when `version` is `None`.
async fn target_schema(
    state: &Arc<DaemonState>,
    tenant: &TenantId,
    collection: &CollectionName,
    version: Option<u32>,
) -> std::result::Result<CollectionSchema, RpcError> {
    let db = state.db.lock().await;
    let schema = match version {
        Some(version) => schemas::get(&db, tenant, collection, version)?,
        None => schemas::active(&db, tenant, collection)?,
    };
    schema.ok_or_else(|| {
        RpcError::schema_not_found(&match version {
            Some(v) => format!("{tenant}/{collection} v{v}"),
            None => format!("{tenant}/{collection} has no active schema"),
        })
    })
}

/// Ordered transform steps between two versions.
pub async fn get_path(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let from: u32 = required(params, "from")?;
    let to: u32 = required(params, "to")?;
    let path = state
        .migrations
        .get_migration_path(&tenant, &collection, from, to)
        .await?;
    to_value(&path)
}

/// Compatibility between two stored versions.
pub async fn check_compatibility(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let from: u32 = required(params, "from")?;
    let to: Option<u32> = optional(params, "to")?;
    let old = target_schema(state, &tenant, &collection, Some(from)).await?;
    let new = target_schema(state, &tenant, &collection, to).await?;
    let report = state.migrations.check_compatibility(&old, &new).await?;
    to_value(&report)
}

/// Eagerly migrate every outdated document of a collection.
pub async fn bulk_migrate(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let target = target_schema(state, &tenant, &collection, optional(params, "target")?).await?;
    let batch_size: Option<usize> = optional(params, "batch_size")?;

    let report = state
        .migrations
        .bulk_migrate_collection(&tenant, &collection, target.version, batch_size)
        .await?;
    state.event_bus.emit(
        "MigrationCompleted",
        json!({
            "tenant": tenant,
            "collection": collection,
            "target_version": report.target_version,
            "succeeded": report.succeeded,
            "failed": report.failed,
        }),
    );
    to_value(&report)
}

/// Dry-run a migration over a sample of documents.
pub async fn preview(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let target = target_schema(state, &tenant, &collection, optional(params, "target")?).await?;
    let sample: usize = optional(params, "sample")?.unwrap_or(DEFAULT_PREVIEW_SAMPLE);
    let entries = state
        .migrations
        .preview_migration(&tenant, &collection, target.version, sample)
        .await?;
    to_value(&entries)
}

/// Store a document tagged with the collection's active version.
pub async fn insert_document(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let table: TableName = required(params, "table")?;
    let data: Value = required(params, "data")?;
    if !data.is_object() {
        return Err(RpcError::invalid_params("data must be a JSON object"));
    }

    let db = state.db.lock().await;
    let version = schemas::active(&db, &tenant, &collection)?.map(|s| s.version);
    let id = documents::insert(&db, &tenant, &collection, &table, &data, version, now_secs())?;
    Ok(json!({"id": id, "schema_version": version}))
}

/// Read a document, lazily upgrading it to the active version.
pub async fn get_document(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let table: TableName = required(params, "table")?;
    let id: i64 = required(params, "id")?;
    match state
        .migrations
        .load_document(&tenant, &collection, &table, id)
        .await?
    {
        Some(document) => to_value(&document),
        None => Err(RpcError::document_not_found(id)),
    }
}

/// Migrate one document to `target` (default: active) and persist it.
pub async fn migrate_document(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let table: TableName = required(params, "table")?;
    let id: i64 = required(params, "id")?;
    let target = target_schema(state, &tenant, &collection, optional(params, "target")?).await?;

    let mut document = {
        let db = state.db.lock().await;
        documents::get(&db, &tenant, &collection, &table, id)?
    }
    .ok_or_else(|| RpcError::document_not_found(id))?;

    let outcome = state.migrations.migrate_document(&mut document, &target).await?;
    if let MigrationOutcome::Migrated { from, to, .. } = outcome {
        {
            let db = state.db.lock().await;
            documents::update(&db, &document, now_secs())?;
        }
        state.event_bus.emit(
            "DocumentMigrated",
            json!({
                "tenant": tenant,
                "collection": collection,
                "table": table,
                "id": id,
                "from": from,
                "to": to,
            }),
        );
    }
    Ok(json!({"outcome": to_value(&outcome)?, "document": to_value(&document)?}))
}

//! Schema and tenant command handlers.
//!
//! Publishing follows the full control flow: store the new version, bring
//! the collection's indexes in line with it, then report how the change
//! affects existing documents.

use std::sync::Arc;

use serde_json::{json, Value};

use docshard_db::queries::{schemas, tenants};
use docshard_index::parse_index_definitions;
use docshard_migrate::validate_migrations;
use docshard_types::{now_secs, CollectionSchema, SchemaDocument, Tier};

use super::{optional, required, scope, to_value, Result};
use crate::rpc::RpcError;
use crate::DaemonState;

/// Accept the schema either as a JSON object or as raw text.
fn raw_schema(params: &Value) -> std::result::Result<String, RpcError> {
    match params.get("schema") {
        Some(Value::String(raw)) => Ok(raw.clone()),
        Some(value @ Value::Object(_)) => Ok(value.to_string()),
        _ => Err(RpcError::invalid_params("schema must be an object or a string")),
    }
}

fn parse_checked(raw: &str) -> std::result::Result<SchemaDocument, RpcError> {
    let doc = SchemaDocument::parse(raw)
        .map_err(|e| RpcError::invalid_schema(&e.to_string(), json!([])))?;
    let issues = validate_migrations(&doc);
    if !issues.is_empty() {
        return Err(RpcError::invalid_schema(
            "migrations map has malformed entries",
            to_value(&issues)?,
        ));
    }
    Ok(doc)
}

/// Reconcile indexes for `schema`, reporting failure instead of raising it.
async fn sync_indexes(state: &Arc<DaemonState>, schema: &CollectionSchema) -> Value {
    match state
        .indexes
        .sync_indexes_for_schema(&schema.tenant, &schema.collection, schema)
        .await
    {
        Ok(report) => {
            state.event_bus.emit(
                "IndexesSynced",
                json!({
                    "tenant": schema.tenant,
                    "collection": schema.collection,
                    "version": schema.version,
                    "created": report.created,
                    "dropped": report.dropped,
                    "failed": report.failed.len(),
                }),
            );
            to_value(&report).unwrap_or(Value::Null)
        }
        Err(e) => {
            tracing::warn!(
                tenant = %schema.tenant,
                collection = %schema.collection,
                error = %e,
                "index sync failed"
            );
            state.event_bus.emit(
                "IndexSyncFailed",
                json!({"tenant": schema.tenant, "collection": schema.collection, "error": e.to_string()}),
            );
            json!({"error": e.to_string()})
        }
    }
}

/// Publish a new schema version.
pub async fn publish(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let raw = raw_schema(params)?;
    let system: bool = optional(params, "system")?.unwrap_or(false);
    parse_checked(&raw)?;

    let (previous, published) = {
        let db = state.db.lock().await;
        let previous = schemas::active(&db, &tenant, &collection)?;
        let published = schemas::publish(&db, &tenant, &collection, &raw, system, now_secs())?;
        (previous, published)
    };

    tracing::info!(
        tenant = %tenant,
        collection = %collection,
        version = published.version,
        "schema published"
    );
    state.event_bus.emit(
        "SchemaPublished",
        json!({"tenant": tenant, "collection": collection, "version": published.version}),
    );

    let indexes = sync_indexes(state, &published).await;

    let compatibility = match previous {
        Some(previous) => {
            let report = state
                .migrations
                .check_compatibility(&previous, &published)
                .await?;
            to_value(&report)?
        }
        None => Value::Null,
    };

    Ok(json!({
        "tenant": tenant,
        "collection": collection,
        "version": published.version,
        "indexes": indexes,
        "compatibility": compatibility,
    }))
}

/// Get one version, or the active one when `version` is omitted.
pub async fn get(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let version: Option<u32> = optional(params, "version")?;
    let db = state.db.lock().await;
    let schema = match version {
        Some(version) => schemas::get(&db, &tenant, &collection, version)?,
        None => schemas::active(&db, &tenant, &collection)?,
    };
    match schema {
        Some(schema) => to_value(&schema),
        None => Err(RpcError::schema_not_found(&format!("{tenant}/{collection}"))),
    }
}

/// List every version of a collection.
pub async fn list(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let db = state.db.lock().await;
    let versions = schemas::list(&db, &tenant, &collection)?;
    let summary: Vec<Value> = versions
        .iter()
        .map(|s| {
            json!({
                "version": s.version,
                "active": s.active,
                "locked": s.locked,
                "system": s.system,
            })
        })
        .collect();
    Ok(json!(summary))
}

/// Make an existing version active and resync its indexes.
pub async fn activate(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let version: u32 = required(params, "version")?;
    let schema = {
        let db = state.db.lock().await;
        schemas::activate(&db, &tenant, &collection, version)?;
        schemas::get(&db, &tenant, &collection, version)?
            .ok_or_else(|| RpcError::schema_not_found(&format!("{collection} v{version}")))?
    };
    state.event_bus.emit(
        "SchemaActivated",
        json!({"tenant": tenant, "collection": collection, "version": version}),
    );
    let indexes = sync_indexes(state, &schema).await;
    Ok(json!({"version": version, "indexes": indexes}))
}

/// Lock or unlock a version.
pub async fn lock(state: &Arc<DaemonState>, params: &Value) -> Result {
    let (tenant, collection) = scope(params)?;
    let version: u32 = required(params, "version")?;
    let locked: bool = optional(params, "locked")?.unwrap_or(true);
    {
        let db = state.db.lock().await;
        schemas::set_locked(&db, &tenant, &collection, version, locked)?;
    }
    state.event_bus.emit(
        if locked { "SchemaLocked" } else { "SchemaUnlocked" },
        json!({"tenant": tenant, "collection": collection, "version": version}),
    );
    Ok(json!({"version": version, "locked": locked}))
}

/// Check a schema without storing it.
pub async fn validate(_state: &Arc<DaemonState>, params: &Value) -> Result {
    let raw = raw_schema(params)?;
    let doc = match SchemaDocument::parse(&raw) {
        Ok(doc) => doc,
        Err(e) => return Ok(json!({"valid": false, "error": e.to_string()})),
    };
    let issues = validate_migrations(&doc);
    let indexes = parse_index_definitions(&doc);
    Ok(json!({
        "valid": issues.is_empty(),
        "migration_issues": to_value(&issues)?,
        "indexes": to_value(&indexes.definitions)?,
        "skipped_indexes": to_value(&indexes.skipped)?,
    }))
}

/// Register a tenant or change its tier.
pub async fn set_tier(state: &Arc<DaemonState>, params: &Value) -> Result {
    let tenant = required(params, "tenant")?;
    let tier: Tier = required(params, "tier")?;
    {
        let db = state.db.lock().await;
        tenants::upsert(&db, &tenant, tier, now_secs())?;
    }
    state
        .event_bus
        .emit("TenantTierChanged", json!({"tenant": tenant, "tier": tier}));
    Ok(json!({"tenant": tenant, "tier": tier}))
}

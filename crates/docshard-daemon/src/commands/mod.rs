//! IPC command handlers.
//!
//! Each submodule implements the commands for one RPC namespace. Handlers
//! hold the database lock only for direct queries and release it before
//! calling into an engine, since the engines share the same connection.

pub mod index;
pub mod migration;
pub mod schema;
pub mod sequence;
pub mod system;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use docshard_types::{CollectionName, SequenceKey, TableName, TenantId};

use crate::rpc::RpcError;

pub(crate) type Result = std::result::Result<Value, RpcError>;

/// Deserialize a required parameter.
pub(crate) fn required<T: DeserializeOwned>(
    params: &Value,
    name: &str,
) -> std::result::Result<T, RpcError> {
    match params.get(name) {
        None | Some(Value::Null) => Err(RpcError::invalid_params(&format!("{name} required"))),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| RpcError::invalid_params(&format!("{name}: {e}"))),
    }
}

/// Deserialize an optional parameter; missing and null are both `None`.
pub(crate) fn optional<T: DeserializeOwned>(
    params: &Value,
    name: &str,
) -> std::result::Result<Option<T>, RpcError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required(params, name).map(Some),
    }
}

pub(crate) fn scope(params: &Value) -> std::result::Result<(TenantId, CollectionName), RpcError> {
    Ok((required(params, "tenant")?, required(params, "collection")?))
}

pub(crate) fn sequence_key(params: &Value) -> std::result::Result<SequenceKey, RpcError> {
    let (tenant, collection) = scope(params)?;
    let table: TableName = required(params, "table")?;
    Ok(SequenceKey::new(tenant, collection, table))
}

pub(crate) fn to_value<T: Serialize>(value: &T) -> Result {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(&e.to_string()))
}

#[cfg(test)]
pub(crate) fn test_state() -> std::sync::Arc<crate::DaemonState> {
    let conn = docshard_db::open_memory().expect("open db");
    let node = docshard_sequence::NodeId::new("test-node").expect("node");
    std::sync::Arc::new(
        crate::DaemonState::new(conn, crate::config::DaemonConfig::default(), node)
            .expect("state"),
    )
}

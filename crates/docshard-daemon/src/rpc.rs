//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! line-delimited JSON-RPC calls to the command handlers. A connection that
//! calls `events.subscribe` becomes a notification stream.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use docshard_db::DbError;
use docshard_index::IndexError;
use docshard_migrate::MigrationError;
use docshard_sequence::SequenceError;

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    pub code: i32,
    /// Stable error name.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    fn new(code: i32, message: &str, detail: impl ToString) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: Some(serde_json::json!({"detail": detail.to_string()})),
        }
    }

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self::new(-32602, "INVALID_PARAMS", detail)
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self::new(-32603, "INTERNAL_ERROR", detail)
    }

    /// Schema version missing (-32020).
    pub fn schema_not_found(detail: &str) -> Self {
        Self::new(-32020, "SCHEMA_NOT_FOUND", detail)
    }

    /// Schema text or migrations map rejected (-32022).
    pub fn invalid_schema(detail: &str, issues: serde_json::Value) -> Self {
        Self {
            code: -32022,
            message: "INVALID_SCHEMA".to_string(),
            data: Some(serde_json::json!({"detail": detail, "issues": issues})),
        }
    }

    /// Document missing (-32060).
    pub fn document_not_found(id: i64) -> Self {
        Self {
            code: -32060,
            message: "DOCUMENT_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"id": id})),
        }
    }
}

impl From<DbError> for RpcError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(_) => Self::new(-32061, "NOT_FOUND", e),
            DbError::Constraint(_) => Self::new(-32021, "CONSTRAINT_VIOLATION", e),
            DbError::InvalidRow(_) => Self::new(-32022, "INVALID_SCHEMA", e),
            _ => Self::internal_error(&format!("db error: {e}")),
        }
    }
}

impl From<MigrationError> for RpcError {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::SchemaNotFound { .. } => Self::new(-32020, "SCHEMA_NOT_FOUND", e),
            MigrationError::InvalidSchema { .. } | MigrationError::MalformedStep(_) => {
                Self::new(-32022, "INVALID_SCHEMA", e)
            }
            MigrationError::Store(_) => Self::internal_error(&e.to_string()),
            _ => Self::new(-32030, "MIGRATION_FAILED", e),
        }
    }
}

impl From<IndexError> for RpcError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::QuotaExceeded {
                ref tenant,
                tier,
                current,
                limit,
            } => Self {
                code: -32040,
                message: "INDEX_QUOTA_EXCEEDED".to_string(),
                data: Some(serde_json::json!({
                    "tenant": tenant,
                    "tier": tier,
                    "current": current,
                    "limit": limit,
                })),
            },
            IndexError::NotFound { .. } => Self::new(-32041, "INDEX_NOT_FOUND", e),
            IndexError::NameConflict { .. } => Self::new(-32042, "INDEX_CONFLICT", e),
            IndexError::InvalidDefinition(_)
            | IndexError::InvalidPartial(_)
            | IndexError::Schema(_) => Self::new(-32043, "INVALID_INDEX", e),
            IndexError::Ddl(_) | IndexError::Timeout(_) => Self::new(-32044, "DDL_FAILED", e),
            IndexError::Store(_) => Self::internal_error(&e.to_string()),
        }
    }
}

impl From<SequenceError> for RpcError {
    fn from(e: SequenceError) -> Self {
        Self::new(-32050, "SEQUENCE_UNAVAILABLE", e)
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn write_json<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(_) => {
                let response = RpcResponse::error(serde_json::Value::Null, RpcError::parse_error());
                write_json(&mut writer, &response).await?;
                continue;
            }
        };

        if request.method == "events.subscribe" {
            let parsed = match &request.params {
                serde_json::Value::Null => Ok(EventFilter::default()),
                params => serde_json::from_value(params.clone()),
            };
            let filter: EventFilter = match parsed {
                Ok(filter) => filter,
                Err(e) => {
                    let response = RpcResponse::error(
                        request.id,
                        RpcError::invalid_params(&format!("filter: {e}")),
                    );
                    write_json(&mut writer, &response).await?;
                    continue;
                }
            };
            return stream_events(state, writer, request.id, filter).await;
        }

        let response = dispatch_request(state.clone(), request).await;
        write_json(&mut writer, &response).await?;
    }

    Ok(())
}

/// Push matching events as `event` notifications until the client leaves.
async fn stream_events(
    state: Arc<DaemonState>,
    mut writer: OwnedWriteHalf,
    id: serde_json::Value,
    filter: EventFilter,
) -> anyhow::Result<()> {
    let mut events = state.event_bus.subscribe();
    let subscription: [u8; 8] = rand::random();
    let subscription = hex::encode(subscription);
    let ack = RpcResponse::success(id, serde_json::json!({"subscription_id": subscription}));
    write_json(&mut writer, &ack).await?;

    loop {
        match events.recv().await {
            Ok(event) => {
                if !filter.matches(&event) {
                    continue;
                }
                let notification = serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "event",
                    "params": {"subscription_id": subscription, "event": event},
                });
                if write_json(&mut writer, &notification).await.is_err() {
                    debug!(subscription = %subscription, "subscriber disconnected");
                    return Ok(());
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(subscription = %subscription, skipped, "subscriber lagging, events dropped");
            }
            Err(RecvError::Closed) => return Ok(()),
        }
    }
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::error(id, RpcError::invalid_request());
    }
    let method = request.method.as_str();
    let params = &request.params;

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Schemas and tenants
        "schema.publish" => commands::schema::publish(&state, params).await,
        "schema.get" => commands::schema::get(&state, params).await,
        "schema.list" => commands::schema::list(&state, params).await,
        "schema.activate" => commands::schema::activate(&state, params).await,
        "schema.lock" => commands::schema::lock(&state, params).await,
        "schema.validate" => commands::schema::validate(&state, params).await,
        "tenant.set_tier" => commands::schema::set_tier(&state, params).await,

        // Migration
        "migration.get_path" => commands::migration::get_path(&state, params).await,
        "migration.check_compatibility" => {
            commands::migration::check_compatibility(&state, params).await
        }
        "migration.bulk_migrate" => commands::migration::bulk_migrate(&state, params).await,
        "migration.preview" => commands::migration::preview(&state, params).await,
        "documents.insert" => commands::migration::insert_document(&state, params).await,
        "documents.get" => commands::migration::get_document(&state, params).await,
        "documents.migrate" => commands::migration::migrate_document(&state, params).await,

        // Indexes
        "index.sync" => commands::index::sync(&state, params).await,
        "index.create" => commands::index::create(&state, params).await,
        "index.drop" => commands::index::drop(&state, params).await,
        "index.list" => commands::index::list(&state, params).await,
        "index.history" => commands::index::history(&state, params).await,

        // Sequences
        "sequence.next_id" => commands::sequence::next_id(&state, params).await,
        "sequence.allocate_block" => commands::sequence::allocate_block(&state, params).await,
        "sequence.status" => commands::sequence::status(&state, params).await,
        "sequence.invalidate" => commands::sequence::invalidate(&state, params).await,

        // Daemon
        "daemon.status" => commands::system::status(&state).await,
        "daemon.shutdown" => commands::system::shutdown(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => {
            debug!(method, code = e.code, error = %e.message, "RPC call failed");
            RpcResponse::error(id, e)
        }
    }
}

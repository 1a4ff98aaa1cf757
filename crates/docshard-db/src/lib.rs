//! # docshard-db
//!
//! SQLite persistence for the document layer. One database file,
//! `<data_dir>/docshard.db`, holds tenants, versioned collection schemas,
//! documents, virtual index metadata and sequence cursors.
//!
//! Conventions:
//!
//! - timestamps are Unix epoch seconds
//! - document bodies are stored as JSON text and checked with `json_valid`
//! - the layout version lives in `PRAGMA user_version` (see [`migrations`])
//!
//! [`queries`] holds plain functions over a `&Connection`; [`SqliteStore`]
//! wraps one shared connection and implements the engine collaborator traits
//! on top of them.

pub mod migrations;
pub mod queries;
pub mod schema;
pub mod store;

use std::path::Path;

use rusqlite::Connection;

pub use store::SqliteStore;

/// Storage layout version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage schema upgrade: {0}")]
    Migration(String),

    #[error("{0} does not exist")]
    NotFound(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("bad JSON payload: {0}")]
    Serialization(String),

    /// A persisted identifier no longer passes validation.
    #[error("stored identifier is invalid: {0}")]
    InvalidRow(#[from] docshard_types::SchemaError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open `path`, creating the file if needed, and upgrade it to
/// [`SCHEMA_VERSION`].
pub fn open(path: &Path) -> Result<Connection> {
    prepare(Connection::open(path)?)
}

/// Private in-memory database with the full layout applied.
pub fn open_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory()?)
}

fn prepare(conn: Connection) -> Result<Connection> {
    // In-memory databases silently keep journal_mode=memory.
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    migrations::run(&conn)?;
    Ok(conn)
}

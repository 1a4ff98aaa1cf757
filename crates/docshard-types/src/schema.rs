//! Versioned collection schemas.
//!
//! A schema's raw text is a JSON document with this layout:
//!
//! ```text
//! {
//!   "tables": {
//!     "<table>": {
//!       "properties": { "<field>": { "type": "...", "x-index": true } },
//!       "x-indexes": [ { "fields": [...], "name": "...", "partial": "...",
//!                        "unique": false, "type": "btree" } ]
//!     }
//!   },
//!   "x-migrations": {
//!     "<from>_to_<to>": [ { "field": "...", "transform": "...", "args": ..., "reason": "..." } ]
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CollectionName, Result, SchemaError, TenantId};

/// Root key holding the per-table schema map.
pub const TABLES_KEY: &str = "tables";
/// Root key holding the migrations map.
pub const MIGRATIONS_KEY: &str = "x-migrations";
/// Per-field boolean hint requesting a single-field index.
pub const INDEX_HINT_KEY: &str = "x-index";
/// Per-table list of composite index declarations.
pub const COMPOSITE_INDEXES_KEY: &str = "x-indexes";

/// One version of a collection's JSON Schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub tenant: TenantId,
    pub collection: CollectionName,
    /// Monotonically increasing per (tenant, collection).
    pub version: u32,
    pub active: bool,
    /// Blocks structural changes.
    pub locked: bool,
    pub system: bool,
    /// Raw schema text including migration and index metadata.
    pub raw: String,
}

impl CollectionSchema {
    /// Parse the raw schema text.
    pub fn document(&self) -> Result<SchemaDocument> {
        SchemaDocument::parse(&self.raw)
    }
}

/// A parsed raw schema with typed accessors for the embedded metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument {
    root: Map<String, Value>,
}

impl SchemaDocument {
    pub fn parse(raw: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(raw)? {
            Value::Object(root) => Ok(Self { root }),
            _ => Err(SchemaError::NotAnObject),
        }
    }

    /// Table schemas in key order. Non-object table entries are skipped.
    pub fn tables(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.root
            .get(TABLES_KEY)
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|tables| tables.iter())
            .filter_map(|(name, table)| table.as_object().map(|t| (name.as_str(), t)))
    }

    /// The embedded migrations map, if declared.
    pub fn migrations(&self) -> Option<&Map<String, Value>> {
        self.root.get(MIGRATIONS_KEY).and_then(Value::as_object)
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.root
    }
}

//! Tenant-scoped JSON documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CollectionName, TableName, TenantId};

/// Schema version assumed for documents that were never tagged.
pub const INITIAL_SCHEMA_VERSION: u32 = 1;

/// A JSON payload scoped to (tenant, collection, table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub tenant: TenantId,
    pub collection: CollectionName,
    pub table: TableName,
    pub data: Value,
    /// Version last written or migrated against. `None` for legacy rows.
    pub schema_version: Option<u32>,
}

impl Document {
    /// The version this document is treated as being at.
    pub fn effective_version(&self) -> u32 {
        self.schema_version.unwrap_or(INITIAL_SCHEMA_VERSION)
    }
}

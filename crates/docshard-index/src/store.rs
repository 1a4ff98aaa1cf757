//! Collaborator traits: metadata catalog, DDL execution and tenant placement.

use std::time::Duration;

use async_trait::async_trait;
use docshard_types::{CollectionName, Partition, TenantId, Tier, VirtualIndex};

use crate::ddl::SqlDialect;
use crate::Result;

/// Persistent virtual index metadata.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    /// Live (not dropped) indexes for a tenant, optionally narrowed to one
    /// collection.
    async fn list_live(
        &self,
        tenant: &TenantId,
        collection: Option<&CollectionName>,
    ) -> Result<Vec<VirtualIndex>>;

    async fn find_live(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        name: &str,
    ) -> Result<Option<VirtualIndex>>;

    /// Live indexes across all of a tenant's collections.
    async fn count_live(&self, tenant: &TenantId) -> Result<usize>;

    /// Store a new row; the returned copy carries the assigned id.
    async fn insert(&self, index: VirtualIndex) -> Result<VirtualIndex>;

    /// Soft-delete a row.
    async fn mark_dropped(&self, id: i64, dropped_at: u64) -> Result<()>;
}

/// Runs index DDL against the backing store.
#[async_trait]
pub trait DdlExecutor: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    async fn execute(&self, statement: &str, timeout: Duration) -> Result<()>;

    /// Whether a physical index with this name exists right now.
    async fn index_exists(&self, physical_name: &str) -> Result<bool>;
}

/// Tenant tier and partition lookup.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tier(&self, tenant: &TenantId) -> Result<Tier>;

    async fn partition(&self, tenant: &TenantId) -> Result<Partition>;
}

//! Collaborator traits for schema and document persistence.

use async_trait::async_trait;
use docshard_types::{CollectionName, CollectionSchema, Document, TableName, TenantId};

use crate::Result;

/// Read access to versioned collection schemas.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Load one version of a collection schema.
    async fn load_schema(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        version: u32,
    ) -> Result<Option<CollectionSchema>>;

    /// Every stored version for (tenant, collection), in any order.
    async fn list_versions(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
    ) -> Result<Vec<CollectionSchema>>;

    /// The currently active version, if the collection has one.
    async fn active_schema(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
    ) -> Result<Option<CollectionSchema>>;
}

/// Document access used by lazy and bulk migration.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn fetch_document(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        table: &TableName,
        id: i64,
    ) -> Result<Option<Document>>;

    /// Persist `data` and `schema_version` of an existing document.
    async fn update_document(&self, document: &Document) -> Result<()>;

    /// Live documents in a collection.
    async fn count_documents(&self, tenant: &TenantId, collection: &CollectionName)
        -> Result<u64>;

    /// Up to `limit` live documents with id greater than `after_id` whose
    /// effective version is below `below_version`, ordered by id.
    async fn fetch_batch(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        below_version: u32,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Document>>;
}

//! Collaborator trait implementations over one shared SQLite connection.
//!
//! Every engine talks to storage through traits. [`SqliteStore`] implements
//! all of them, so a single connection serves schema reads, document
//! migration, index metadata, index DDL and block reservation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use docshard_index::{DdlExecutor, IndexCatalog, IndexError, SqlDialect, TenantDirectory};
use docshard_migrate::{DocumentStore, MigrationError, SchemaStore};
use docshard_sequence::{BlockRange, BlockReserver, NodeId, SequenceError};
use docshard_types::{
    now_secs, CollectionName, CollectionSchema, Document, Partition, SequenceKey, TableName,
    TenantId, Tier, VirtualIndex,
};

use crate::queries::{documents, indexes, schemas, sequences, tenants};
use crate::DbError;

/// Physical table holding every tenant's documents.
pub const SHARED_PARTITION: &str = "documents";

impl From<DbError> for MigrationError {
    fn from(e: DbError) -> Self {
        MigrationError::Store(e.to_string())
    }
}

impl From<DbError> for IndexError {
    fn from(e: DbError) -> Self {
        IndexError::Store(e.to_string())
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self::from_shared(Arc::new(Mutex::new(conn)))
    }

    /// Wrap a connection that other components also lock.
    pub fn from_shared(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn open_memory() -> crate::Result<Self> {
        Ok(Self::new(crate::open_memory()?))
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

#[async_trait]
impl SchemaStore for SqliteStore {
    async fn load_schema(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        version: u32,
    ) -> docshard_migrate::Result<Option<CollectionSchema>> {
        let conn = self.conn.lock().await;
        Ok(schemas::get(&conn, tenant, collection, version)?)
    }

    async fn list_versions(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
    ) -> docshard_migrate::Result<Vec<CollectionSchema>> {
        let conn = self.conn.lock().await;
        Ok(schemas::list(&conn, tenant, collection)?)
    }

    async fn active_schema(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
    ) -> docshard_migrate::Result<Option<CollectionSchema>> {
        let conn = self.conn.lock().await;
        Ok(schemas::active(&conn, tenant, collection)?)
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn fetch_document(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        table: &TableName,
        id: i64,
    ) -> docshard_migrate::Result<Option<Document>> {
        let conn = self.conn.lock().await;
        Ok(documents::get(&conn, tenant, collection, table, id)?)
    }

    async fn update_document(&self, document: &Document) -> docshard_migrate::Result<()> {
        let conn = self.conn.lock().await;
        Ok(documents::update(&conn, document, now_secs())?)
    }

    async fn count_documents(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
    ) -> docshard_migrate::Result<u64> {
        let conn = self.conn.lock().await;
        Ok(documents::count(&conn, tenant, collection)?)
    }

    async fn fetch_batch(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        below_version: u32,
        after_id: i64,
        limit: usize,
    ) -> docshard_migrate::Result<Vec<Document>> {
        let conn = self.conn.lock().await;
        Ok(documents::fetch_batch(
            &conn,
            tenant,
            collection,
            below_version,
            after_id,
            limit,
        )?)
    }
}

#[async_trait]
impl IndexCatalog for SqliteStore {
    async fn list_live(
        &self,
        tenant: &TenantId,
        collection: Option<&CollectionName>,
    ) -> docshard_index::Result<Vec<VirtualIndex>> {
        let conn = self.conn.lock().await;
        Ok(indexes::list_live(&conn, tenant, collection)?)
    }

    async fn find_live(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        name: &str,
    ) -> docshard_index::Result<Option<VirtualIndex>> {
        let conn = self.conn.lock().await;
        Ok(indexes::find_live(&conn, tenant, collection, name)?)
    }

    async fn count_live(&self, tenant: &TenantId) -> docshard_index::Result<usize> {
        let conn = self.conn.lock().await;
        Ok(indexes::count_live(&conn, tenant)?)
    }

    async fn insert(&self, index: VirtualIndex) -> docshard_index::Result<VirtualIndex> {
        let conn = self.conn.lock().await;
        let id = indexes::insert(&conn, &index)?;
        Ok(VirtualIndex { id, ..index })
    }

    async fn mark_dropped(&self, id: i64, dropped_at: u64) -> docshard_index::Result<()> {
        let conn = self.conn.lock().await;
        Ok(indexes::mark_dropped(&conn, id, dropped_at)?)
    }
}

#[async_trait]
impl DdlExecutor for SqliteStore {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    /// Run DDL on a blocking thread. On timeout the statement is interrupted
    /// and the connection released.
    async fn execute(&self, statement: &str, timeout: Duration) -> docshard_index::Result<()> {
        let conn = self.conn.clone().lock_owned().await;
        let interrupt = conn.get_interrupt_handle();
        let sql = statement.to_string();
        let task = tokio::task::spawn_blocking(move || conn.execute_batch(&sql));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(statement, "ddl applied");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(IndexError::Ddl(e.to_string())),
            Ok(Err(e)) => Err(IndexError::Ddl(format!("ddl task failed: {e}"))),
            Err(_) => {
                interrupt.interrupt();
                Err(IndexError::Timeout(timeout.as_secs()))
            }
        }
    }

    async fn index_exists(&self, physical_name: &str) -> docshard_index::Result<bool> {
        let conn = self.conn.lock().await;
        Ok(indexes::physical_exists(&conn, physical_name)?)
    }
}

#[async_trait]
impl TenantDirectory for SqliteStore {
    async fn tier(&self, tenant: &TenantId) -> docshard_index::Result<Tier> {
        let conn = self.conn.lock().await;
        Ok(tenants::tier(&conn, tenant)?)
    }

    /// SQLite keeps every tenant in the shared documents table.
    async fn partition(&self, _tenant: &TenantId) -> docshard_index::Result<Partition> {
        Ok(Partition::Shared {
            table: SHARED_PARTITION.to_string(),
        })
    }
}

#[async_trait]
impl BlockReserver for SqliteStore {
    async fn reserve(
        &self,
        key: &SequenceKey,
        node: &NodeId,
        size: u64,
    ) -> docshard_sequence::Result<BlockRange> {
        let conn = self.conn.lock().await;
        sequences::reserve(&conn, key, node, size, now_secs()).map_err(|e| {
            SequenceError::Reservation {
                key: key.to_string(),
                detail: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshard_index::IndexConfig;
    use docshard_index::{IndexDefinition, IndexSynthesizer};
    use docshard_types::IndexMethod;
    use serde_json::json;

    fn tenant() -> TenantId {
        TenantId::new("acme").expect("tenant")
    }

    fn collection() -> CollectionName {
        CollectionName::new("shop").expect("collection")
    }

    #[tokio::test]
    async fn test_ddl_builds_real_index() {
        let store = SqliteStore::open_memory().expect("store");
        let shared = Arc::new(store.clone());
        let synth = IndexSynthesizer::new(
            shared.clone(),
            shared.clone(),
            shared,
            IndexConfig::default(),
        );

        let created = synth
            .create_virtual_index(
                &tenant(),
                &collection(),
                IndexDefinition {
                    table: TableName::new("orders").expect("table"),
                    name: "by_customer".to_string(),
                    fields: vec!["customer.id".to_string()],
                    partial: Some("{status} = 'open'".to_string()),
                    unique: false,
                    method: IndexMethod::Btree,
                },
            )
            .await
            .expect("create");

        let conn = store.connection();
        let conn = conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                [created.physical_name.as_str()],
                |row| row.get(0),
            )
            .expect("lookup");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_bad_ddl_is_reported() {
        let store = SqliteStore::open_memory().expect("store");
        let result = store
            .execute("CREATE INDEX x ON missing_table (a)", Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(IndexError::Ddl(_))));
    }

    #[tokio::test]
    async fn test_document_store_roundtrip() {
        let store = SqliteStore::open_memory().expect("store");
        let table = TableName::new("orders").expect("table");
        let id = {
            let conn = store.connection();
            let conn = conn.lock().await;
            documents::insert(&conn, &tenant(), &collection(), &table, &json!({"a": 1}), None, 1)
                .expect("insert")
        };

        let mut doc = store
            .fetch_document(&tenant(), &collection(), &table, id)
            .await
            .expect("fetch")
            .expect("present");
        doc.schema_version = Some(2);
        store.update_document(&doc).await.expect("update");
        assert_eq!(
            store.count_documents(&tenant(), &collection()).await.expect("count"),
            1
        );
        let batch = store
            .fetch_batch(&tenant(), &collection(), 2, i64::MIN, 10)
            .await
            .expect("batch");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_reserver_maps_failures() {
        let store = SqliteStore::open_memory().expect("store");
        let key = SequenceKey::new(tenant(), collection(), TableName::new("orders").expect("t"));
        let node = NodeId::new("node-a").expect("node");
        let range = store.reserve(&key, &node, 10).await.expect("reserve");
        assert_eq!(range, BlockRange { start: 1, end: 11 });

        let result = store.reserve(&key, &node, u64::MAX).await;
        assert!(matches!(result, Err(SequenceError::Reservation { .. })));
    }
}

//! Integration test crate for docshard.
//!
//! The library only holds fixtures shared by the tests under `tests/`. Every
//! test wires the real engines to an in-memory SQLite store, so the whole
//! flow from schema publish to index DDL and block reservation runs without
//! a daemon process.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p docshard-integration-tests
//! ```

use std::sync::Arc;

use serde_json::Value;

use docshard_db::queries::{documents, schemas};
use docshard_db::SqliteStore;
use docshard_index::{IndexConfig, IndexSynthesizer};
use docshard_migrate::{MigrationConfig, MigrationEngine};
use docshard_sequence::{NodeId, SequenceAllocator, SequenceConfig};
use docshard_types::{CollectionName, CollectionSchema, SequenceKey, TableName, TenantId};

/// Simulated timestamp for deterministic rows.
pub const TEST_TIMESTAMP: u64 = 1_700_000_000;

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name).expect("valid tenant")
}

pub fn collection(name: &str) -> CollectionName {
    CollectionName::new(name).expect("valid collection")
}

pub fn table(name: &str) -> TableName {
    TableName::new(name).expect("valid table")
}

pub fn key(t: &str, c: &str, tbl: &str) -> SequenceKey {
    SequenceKey::new(tenant(t), collection(c), table(tbl))
}

/// Engines sharing one in-memory store, as the daemon wires them.
pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub migrations: MigrationEngine,
    pub indexes: IndexSynthesizer,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::default(), IndexConfig::default())
    }

    pub fn with_config(migration: MigrationConfig, indexing: IndexConfig) -> Self {
        let store = Arc::new(SqliteStore::open_memory().expect("open store"));
        let migrations = MigrationEngine::new(store.clone(), store.clone(), migration);
        let indexes = IndexSynthesizer::new(store.clone(), store.clone(), store.clone(), indexing);
        Self {
            store,
            migrations,
            indexes,
        }
    }

    /// A sequence allocator for one node over this harness's store.
    pub fn allocator(&self, node: &str, config: SequenceConfig) -> SequenceAllocator {
        SequenceAllocator::new(
            self.store.clone(),
            NodeId::new(node).expect("valid node id"),
            config,
        )
        .expect("valid sequence config")
    }

    /// Store `schema` as the next active version.
    pub async fn publish(&self, t: &str, c: &str, schema: Value) -> CollectionSchema {
        let conn = self.store.connection();
        let db = conn.lock().await;
        schemas::publish(
            &db,
            &tenant(t),
            &collection(c),
            &schema.to_string(),
            false,
            TEST_TIMESTAMP,
        )
        .expect("publish schema")
    }

    /// Publish and reconcile indexes, the way a schema publish does end to end.
    pub async fn publish_and_sync(&self, t: &str, c: &str, schema: Value) -> CollectionSchema {
        let published = self.publish(t, c, schema).await;
        self.indexes
            .sync_indexes_for_schema(&published.tenant, &published.collection, &published)
            .await
            .expect("sync indexes");
        published
    }

    pub async fn insert(&self, t: &str, c: &str, tbl: &str, data: Value, version: Option<u32>) -> i64 {
        let conn = self.store.connection();
        let db = conn.lock().await;
        documents::insert(
            &db,
            &tenant(t),
            &collection(c),
            &table(tbl),
            &data,
            version,
            TEST_TIMESTAMP,
        )
        .expect("insert document")
    }

    /// Raw read, bypassing lazy migration.
    pub async fn raw(&self, t: &str, c: &str, tbl: &str, id: i64) -> docshard_types::Document {
        let conn = self.store.connection();
        let db = conn.lock().await;
        documents::get(&db, &tenant(t), &collection(c), &table(tbl), id)
            .expect("read document")
            .expect("document exists")
    }

    /// Names of physical indexes that exist in SQLite right now.
    pub async fn physical_indexes(&self) -> Vec<String> {
        let conn = self.store.connection();
        let db = conn.lock().await;
        let mut stmt = db
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'vidx_%' ORDER BY name")
            .expect("prepare");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query");
        let names = rows.collect::<Result<Vec<_>, _>>().expect("rows");
        names
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

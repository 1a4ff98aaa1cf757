//! Reconciles schema index hints with physical indexes.
//!
//! Metadata is written only after DDL succeeds and soft-deleted only after
//! the physical index is gone, so the catalog never claims an index that
//! does not exist. Every failure surfaces as an [`IndexError`]; callers often
//! run this as a side effect of unrelated schema updates.

use std::collections::BTreeMap;
use std::sync::Arc;

use docshard_types::{now_secs, CollectionName, CollectionSchema, TenantId, VirtualIndex};
use serde::Serialize;

use crate::config::IndexConfig;
use crate::ddl::{create_index_sql, drop_index_sql, physical_name};
use crate::definition::{parse_index_definitions, IndexDefinition, SkippedIndex};
use crate::store::{DdlExecutor, IndexCatalog, TenantDirectory};
use crate::{IndexError, Result};

/// An index that could not be created or dropped during a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexFailure {
    pub name: String,
    pub error: String,
}

/// Outcome of [`IndexSynthesizer::sync_indexes_for_schema`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub dropped: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedIndex>,
    pub failed: Vec<IndexFailure>,
}

impl SyncReport {
    /// Number of DDL statements this sync issued successfully.
    pub fn ddl_issued(&self) -> usize {
        self.created.len() + self.dropped.len()
    }
}

/// Creates, drops and reconciles virtual indexes.
#[derive(Clone)]
pub struct IndexSynthesizer {
    catalog: Arc<dyn IndexCatalog>,
    executor: Arc<dyn DdlExecutor>,
    tenants: Arc<dyn TenantDirectory>,
    config: IndexConfig,
}

impl IndexSynthesizer {
    pub fn new(
        catalog: Arc<dyn IndexCatalog>,
        executor: Arc<dyn DdlExecutor>,
        tenants: Arc<dyn TenantDirectory>,
        config: IndexConfig,
    ) -> Self {
        Self {
            catalog,
            executor,
            tenants,
            config,
        }
    }

    /// Make the live indexes of (tenant, collection) match `schema`.
    ///
    /// Undeclared indexes are dropped, missing ones created, and indexes
    /// whose definition changed are rebuilt. An unchanged schema issues no
    /// DDL at all.
    pub async fn sync_indexes_for_schema(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        schema: &CollectionSchema,
    ) -> Result<SyncReport> {
        let doc = schema
            .document()
            .map_err(|e| IndexError::Schema(e.to_string()))?;
        let parsed = parse_index_definitions(&doc);
        let partition = self.tenants.partition(tenant).await?;

        let desired: BTreeMap<String, (IndexDefinition, String)> = parsed
            .definitions
            .into_iter()
            .map(|def| {
                let physical = physical_name(tenant, collection, &def);
                (def.name.clone(), (def, physical))
            })
            .collect();
        let existing = self.catalog.list_live(tenant, Some(collection)).await?;

        let mut report = SyncReport {
            skipped: parsed.skipped,
            ..SyncReport::default()
        };
        let mut current: BTreeMap<String, VirtualIndex> = BTreeMap::new();

        // Drops first so rebuilt indexes do not count twice against the quota.
        for index in existing {
            let keep = desired.get(&index.name).is_some_and(|(_, physical)| {
                *physical == index.physical_name && index.partition == partition.table()
            });
            if keep {
                match self.executor.index_exists(&index.physical_name).await {
                    Ok(true) => {
                        current.insert(index.name.clone(), index);
                    }
                    // Recorded but physically gone: retire the row so the
                    // create pass below rebuilds it.
                    Ok(false) => {
                        tracing::warn!(
                            tenant = %tenant,
                            collection = %collection,
                            index = %index.name,
                            physical = %index.physical_name,
                            "live index has no physical object, rebuilding"
                        );
                        if let Err(e) = self.catalog.mark_dropped(index.id, now_secs()).await {
                            report.failed.push(IndexFailure {
                                name: index.name.clone(),
                                error: e.to_string(),
                            });
                            current.insert(index.name.clone(), index);
                        }
                    }
                    Err(e) => {
                        report.failed.push(IndexFailure {
                            name: index.name.clone(),
                            error: e.to_string(),
                        });
                        current.insert(index.name.clone(), index);
                    }
                }
                continue;
            }
            match self.drop_index(&index).await {
                Ok(_) => report.dropped.push(index.name.clone()),
                Err(e) => {
                    report.failed.push(IndexFailure {
                        name: index.name.clone(),
                        error: e.to_string(),
                    });
                    current.insert(index.name.clone(), index);
                }
            }
        }

        for (name, (def, _)) in desired {
            if current.contains_key(&name) {
                report.unchanged.push(name);
                continue;
            }
            match self.create_virtual_index(tenant, collection, def).await {
                Ok(_) => report.created.push(name),
                Err(e) => report.failed.push(IndexFailure {
                    name,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            tenant = %tenant,
            collection = %collection,
            version = schema.version,
            created = report.created.len(),
            dropped = report.dropped.len(),
            unchanged = report.unchanged.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "index sync finished"
        );
        Ok(report)
    }

    /// Build one index and record it.
    ///
    /// Re-declaring a live index with an identical definition returns the
    /// existing row without touching the store.
    pub async fn create_virtual_index(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        def: IndexDefinition,
    ) -> Result<VirtualIndex> {
        def.validate()?;
        let physical = physical_name(tenant, collection, &def);

        if let Some(existing) = self.catalog.find_live(tenant, collection, &def.name).await? {
            if existing.physical_name == physical {
                return Ok(existing);
            }
            return Err(IndexError::NameConflict {
                collection: collection.to_string(),
                name: def.name,
            });
        }

        let tier = self.tenants.tier(tenant).await?;
        let live = self.catalog.count_live(tenant).await?;
        if let Err(e) = self.config.tiers.check(tenant, tier, live) {
            tracing::warn!(tenant = %tenant, index = %def.name, error = %e, "index quota exceeded");
            return Err(e);
        }

        let partition = self.tenants.partition(tenant).await?;
        let dialect = self.executor.dialect();
        let sql = create_index_sql(dialect, tenant, collection, &def, &partition, &physical)?;

        if let Err(e) = self.executor.execute(&sql, self.config.ddl_timeout()).await {
            tracing::warn!(
                tenant = %tenant,
                collection = %collection,
                index = %def.name,
                physical = %physical,
                error = %e,
                "index creation failed"
            );
            return Err(e);
        }

        let created = self
            .catalog
            .insert(VirtualIndex {
                id: 0,
                tenant: tenant.clone(),
                collection: collection.clone(),
                table: def.table,
                name: def.name,
                physical_name: physical,
                fields: def.fields,
                partial: def.partial,
                unique: def.unique,
                method: def.method,
                partition: partition.table().to_string(),
                created_at: now_secs(),
                dropped_at: None,
            })
            .await?;

        tracing::info!(
            tenant = %tenant,
            collection = %collection,
            index = %created.name,
            physical = %created.physical_name,
            partition = %created.partition,
            "virtual index created"
        );
        Ok(created)
    }

    /// Drop the physical index, then soft-delete its metadata.
    pub async fn drop_virtual_index(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        name: &str,
    ) -> Result<VirtualIndex> {
        let Some(index) = self.catalog.find_live(tenant, collection, name).await? else {
            return Err(IndexError::NotFound {
                collection: collection.to_string(),
                name: name.to_string(),
            });
        };
        self.drop_index(&index).await
    }

    /// Live indexes visible to a tenant.
    pub async fn list_indexes_for_client(
        &self,
        tenant: &TenantId,
        collection: Option<&CollectionName>,
    ) -> Result<Vec<VirtualIndex>> {
        self.catalog.list_live(tenant, collection).await
    }

    /// Physical names are shared when two logical declarations resolve to
    /// the same definition; the object is only dropped with its last row.
    async fn drop_index(&self, index: &VirtualIndex) -> Result<VirtualIndex> {
        let still_referenced = self
            .catalog
            .list_live(&index.tenant, None)
            .await?
            .iter()
            .any(|other| other.id != index.id && other.physical_name == index.physical_name);

        if still_referenced {
            tracing::debug!(
                tenant = %index.tenant,
                index = %index.name,
                physical = %index.physical_name,
                "physical index still referenced, keeping it"
            );
        } else if let Err(e) = self
            .executor
            .execute(
                &drop_index_sql(self.executor.dialect(), &index.physical_name),
                self.config.ddl_timeout(),
            )
            .await
        {
            tracing::warn!(
                tenant = %index.tenant,
                collection = %index.collection,
                index = %index.name,
                error = %e,
                "index drop failed"
            );
            return Err(e);
        }

        let dropped_at = now_secs();
        self.catalog.mark_dropped(index.id, dropped_at).await?;
        tracing::info!(
            tenant = %index.tenant,
            collection = %index.collection,
            index = %index.name,
            physical = %index.physical_name,
            "virtual index dropped"
        );
        Ok(VirtualIndex {
            dropped_at: Some(dropped_at),
            ..index.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::SqlDialect;
    use async_trait::async_trait;
    use docshard_types::{Partition, Tier};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Fixture {
        rows: Mutex<Vec<VirtualIndex>>,
        ddl: Mutex<Vec<String>>,
        fail_ddl: Mutex<bool>,
        /// Physical names reported as absent by `index_exists`.
        missing: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl IndexCatalog for Fixture {
        async fn list_live(
            &self,
            tenant: &TenantId,
            collection: Option<&CollectionName>,
        ) -> Result<Vec<VirtualIndex>> {
            Ok(self
                .rows
                .lock()
                .expect("lock")
                .iter()
                .filter(|r| &r.tenant == tenant && !r.is_dropped())
                .filter(|r| collection.map_or(true, |c| &r.collection == c))
                .cloned()
                .collect())
        }

        async fn find_live(
            &self,
            tenant: &TenantId,
            collection: &CollectionName,
            name: &str,
        ) -> Result<Option<VirtualIndex>> {
            Ok(self
                .list_live(tenant, Some(collection))
                .await?
                .into_iter()
                .find(|r| r.name == name))
        }

        async fn count_live(&self, tenant: &TenantId) -> Result<usize> {
            Ok(self.list_live(tenant, None).await?.len())
        }

        async fn insert(&self, mut index: VirtualIndex) -> Result<VirtualIndex> {
            let mut rows = self.rows.lock().expect("lock");
            index.id = rows.len() as i64 + 1;
            rows.push(index.clone());
            Ok(index)
        }

        async fn mark_dropped(&self, id: i64, dropped_at: u64) -> Result<()> {
            let mut rows = self.rows.lock().expect("lock");
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.dropped_at = Some(dropped_at);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DdlExecutor for Fixture {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Postgres
        }

        async fn execute(&self, statement: &str, _timeout: Duration) -> Result<()> {
            if *self.fail_ddl.lock().expect("lock") {
                return Err(IndexError::Ddl("lock timeout".to_string()));
            }
            self.ddl.lock().expect("lock").push(statement.to_string());
            Ok(())
        }

        async fn index_exists(&self, physical_name: &str) -> Result<bool> {
            let missing = self.missing.lock().expect("lock");
            Ok(!missing.iter().any(|m| m == physical_name))
        }
    }

    #[async_trait]
    impl TenantDirectory for Fixture {
        async fn tier(&self, _tenant: &TenantId) -> Result<Tier> {
            Ok(Tier::Free)
        }

        async fn partition(&self, _tenant: &TenantId) -> Result<Partition> {
            Ok(Partition::Shared {
                table: "documents".to_string(),
            })
        }
    }

    fn tenant() -> TenantId {
        TenantId::new("t1").expect("tenant")
    }

    fn collection() -> CollectionName {
        CollectionName::new("shop").expect("collection")
    }

    fn schema(version: u32, indexes: serde_json::Value) -> CollectionSchema {
        CollectionSchema {
            tenant: tenant(),
            collection: collection(),
            version,
            active: true,
            locked: false,
            system: false,
            raw: json!({"tables": {"orders": {
                "properties": {"sku": {"type": "string", "x-index": true}},
                "x-indexes": indexes
            }}})
            .to_string(),
        }
    }

    fn synthesizer(fixture: &Arc<Fixture>, config: IndexConfig) -> IndexSynthesizer {
        IndexSynthesizer::new(fixture.clone(), fixture.clone(), fixture.clone(), config)
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        let schema = schema(1, json!([{"fields": ["customer_id", "created_at"], "name": "by_customer"}]));

        let first = synth
            .sync_indexes_for_schema(&tenant(), &collection(), &schema)
            .await
            .expect("first sync");
        assert_eq!(first.created, vec!["by_customer".to_string(), "idx_orders_sku".to_string()]);
        assert_eq!(fixture.ddl.lock().expect("lock").len(), 2);

        let second = synth
            .sync_indexes_for_schema(&tenant(), &collection(), &schema)
            .await
            .expect("second sync");
        assert_eq!(second.ddl_issued(), 0);
        assert_eq!(second.unchanged.len(), 2);
        assert_eq!(fixture.ddl.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_removed_declaration_is_dropped() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(1, json!([{"fields": ["customer_id"], "name": "by_customer"}])),
            )
            .await
            .expect("sync v1");

        let report = synth
            .sync_indexes_for_schema(&tenant(), &collection(), &schema(2, json!([])))
            .await
            .expect("sync v2");
        assert_eq!(report.dropped, vec!["by_customer".to_string()]);
        assert_eq!(report.unchanged, vec!["idx_orders_sku".to_string()]);

        let ddl = fixture.ddl.lock().expect("lock");
        assert!(ddl.last().expect("drop").starts_with("DROP INDEX CONCURRENTLY IF EXISTS"));
        let rows = fixture.rows.lock().expect("lock");
        let dropped = rows.iter().find(|r| r.name == "by_customer").expect("row kept");
        assert!(dropped.is_dropped());
    }

    #[tokio::test]
    async fn test_changed_definition_is_rebuilt() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(1, json!([{"fields": ["customer_id"], "name": "by_customer"}])),
            )
            .await
            .expect("sync v1");
        let report = synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(2, json!([{"fields": ["customer_id"], "name": "by_customer", "unique": true}])),
            )
            .await
            .expect("sync v2");
        assert_eq!(report.dropped, vec!["by_customer".to_string()]);
        assert_eq!(report.created, vec!["by_customer".to_string()]);
    }

    #[tokio::test]
    async fn test_quota_rejects_before_ddl() {
        let fixture = Arc::new(Fixture::default());
        let mut config = IndexConfig::default();
        config.tiers.free = 1;
        let synth = synthesizer(&fixture, config);

        let report = synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(1, json!([{"fields": ["customer_id"], "name": "by_customer"}])),
            )
            .await
            .expect("sync");
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(fixture.ddl.lock().expect("lock").len(), 1);
        assert_eq!(fixture.rows.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_ddl_failure_writes_no_metadata() {
        let fixture = Arc::new(Fixture::default());
        *fixture.fail_ddl.lock().expect("lock") = true;
        let synth = synthesizer(&fixture, IndexConfig::default());

        let def = IndexDefinition {
            table: docshard_types::TableName::new("orders").expect("table"),
            name: "by_sku".to_string(),
            fields: vec!["sku".to_string()],
            partial: None,
            unique: false,
            method: docshard_types::IndexMethod::Btree,
        };
        let result = synth.create_virtual_index(&tenant(), &collection(), def).await;
        assert!(matches!(result, Err(IndexError::Ddl(_))));
        assert!(fixture.rows.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_shared_physical_index_outlives_one_declaration() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(1, json!([{"fields": ["sku"], "name": "by_sku"}])),
            )
            .await
            .expect("sync v1");
        {
            let rows = fixture.rows.lock().expect("lock");
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].physical_name, rows[1].physical_name);
        }

        let report = synth
            .sync_indexes_for_schema(&tenant(), &collection(), &schema(2, json!([])))
            .await
            .expect("sync v2");
        assert_eq!(report.dropped, vec!["by_sku".to_string()]);
        assert_eq!(report.unchanged, vec!["idx_orders_sku".to_string()]);
        let ddl = fixture.ddl.lock().expect("lock");
        assert!(ddl.iter().all(|s| !s.starts_with("DROP")), "shared index was dropped: {ddl:?}");
    }

    #[tokio::test]
    async fn test_last_reference_drops_shared_physical_index() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        synth
            .sync_indexes_for_schema(
                &tenant(),
                &collection(),
                &schema(1, json!([{"fields": ["sku"], "name": "by_sku"}])),
            )
            .await
            .expect("sync v1");

        synth
            .drop_virtual_index(&tenant(), &collection(), "by_sku")
            .await
            .expect("drop by_sku");
        synth
            .drop_virtual_index(&tenant(), &collection(), "idx_orders_sku")
            .await
            .expect("drop hint index");

        let ddl = fixture.ddl.lock().expect("lock");
        let drops = ddl.iter().filter(|s| s.starts_with("DROP")).count();
        assert_eq!(drops, 1);
    }

    #[tokio::test]
    async fn test_missing_physical_index_is_rebuilt() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        let v1 = schema(1, json!([]));
        synth
            .sync_indexes_for_schema(&tenant(), &collection(), &v1)
            .await
            .expect("sync v1");
        let physical = fixture.rows.lock().expect("lock")[0].physical_name.clone();
        fixture.missing.lock().expect("lock").push(physical);

        let report = synth
            .sync_indexes_for_schema(&tenant(), &collection(), &v1)
            .await
            .expect("resync");
        assert_eq!(report.created, vec!["idx_orders_sku".to_string()]);
        assert!(report.unchanged.is_empty());

        let rows = fixture.rows.lock().expect("lock");
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_dropped());
        assert!(!rows[1].is_dropped());
        assert_eq!(fixture.ddl.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_drop_unknown_index_is_not_found() {
        let fixture = Arc::new(Fixture::default());
        let synth = synthesizer(&fixture, IndexConfig::default());
        let result = synth
            .drop_virtual_index(&tenant(), &collection(), "missing")
            .await;
        assert!(matches!(result, Err(IndexError::NotFound { .. })));
    }
}

//! Document migration service.
//!
//! Documents are upgraded lazily: on read through [`MigrationEngine::load_document`]
//! or in bounded batches through [`MigrationEngine::bulk_migrate_collection`].
//! Every upgrade is clone-then-swap, so a failed transform never leaves a
//! partially migrated payload behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use docshard_types::{CollectionName, CollectionSchema, Document, TableName, TenantId};
use serde::Serialize;
use serde_json::Value;

use crate::compat::{diff_schemas, CompatibilityReport};
use crate::config::MigrationConfig;
use crate::path::MigrationPath;
use crate::store::{DocumentStore, SchemaStore};
use crate::{MigrationError, Result};

/// What happened to a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    AlreadyCurrent,
    Migrated {
        from: u32,
        to: u32,
        transforms_applied: usize,
    },
}

/// A per-document failure recorded during a bulk run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub document_id: i64,
    pub table: String,
    pub error: String,
}

/// Summary of a bulk migration run. Partial failure is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkMigrationReport {
    pub target_version: u32,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed_ms: u64,
    /// At most `max_error_samples` failures.
    pub errors: Vec<DocumentFailure>,
}

/// One dry-run result from [`MigrationEngine::preview_migration`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewEntry {
    pub document_id: i64,
    pub from_version: u32,
    pub before: Value,
    pub after: Option<Value>,
    pub error: Option<String>,
}

/// Resolves migration paths and applies them to documents.
#[derive(Clone)]
pub struct MigrationEngine {
    schemas: Arc<dyn SchemaStore>,
    documents: Arc<dyn DocumentStore>,
    config: MigrationConfig,
}

impl MigrationEngine {
    pub fn new(
        schemas: Arc<dyn SchemaStore>,
        documents: Arc<dyn DocumentStore>,
        config: MigrationConfig,
    ) -> Self {
        Self {
            schemas,
            documents,
            config,
        }
    }

    /// Ordered steps covering every stored version in `(from, to]`.
    ///
    /// A gap without declared transforms yields an empty step, and an
    /// unresolvable range yields an empty path. Neither is an error.
    pub async fn get_migration_path(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        from: u32,
        to: u32,
    ) -> Result<MigrationPath> {
        if from >= to {
            return Ok(MigrationPath {
                from,
                to,
                steps: Vec::new(),
            });
        }
        let versions = self.schemas.list_versions(tenant, collection).await?;
        MigrationPath::resolve(&versions, from, to)
    }

    /// Upgrade `document` to `target` in memory.
    ///
    /// On any failure the document is left exactly as it was passed in.
    pub async fn migrate_document(
        &self,
        document: &mut Document,
        target: &CollectionSchema,
    ) -> Result<MigrationOutcome> {
        check_scope(document, target)?;
        let from = document.effective_version();
        if from == target.version {
            return Ok(MigrationOutcome::AlreadyCurrent);
        }
        if from > target.version {
            return Err(MigrationError::VersionAhead {
                document: from,
                target: target.version,
            });
        }

        let path = self
            .get_migration_path(&document.tenant, &document.collection, from, target.version)
            .await?;
        let outcome = apply_path(document, &path);
        match &outcome {
            Ok(_) => tracing::debug!(
                tenant = %document.tenant,
                collection = %document.collection,
                document = document.id,
                from,
                to = target.version,
                "document migrated"
            ),
            Err(e) => tracing::warn!(
                tenant = %document.tenant,
                collection = %document.collection,
                document = document.id,
                from,
                to = target.version,
                error = %e,
                "document migration failed"
            ),
        }
        outcome
    }

    /// Fetch a document and bring it up to the active schema version,
    /// persisting the upgraded copy when anything changed.
    pub async fn load_document(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        table: &TableName,
        id: i64,
    ) -> Result<Option<Document>> {
        let Some(mut document) = self
            .documents
            .fetch_document(tenant, collection, table, id)
            .await?
        else {
            return Ok(None);
        };
        let Some(active) = self.schemas.active_schema(tenant, collection).await? else {
            return Ok(Some(document));
        };
        if document.effective_version() >= active.version {
            return Ok(Some(document));
        }
        if let MigrationOutcome::Migrated { .. } = self.migrate_document(&mut document, &active).await? {
            self.documents.update_document(&document).await?;
        }
        Ok(Some(document))
    }

    /// Classify the change from `old` to `new` and count affected documents.
    pub async fn check_compatibility(
        &self,
        old: &CollectionSchema,
        new: &CollectionSchema,
    ) -> Result<CompatibilityReport> {
        if old.tenant != new.tenant || old.collection != new.collection {
            return Err(MigrationError::ScopeMismatch {
                expected: format!("{}/{}", old.tenant, old.collection),
                actual: format!("{}/{}", new.tenant, new.collection),
            });
        }
        let old_doc = parse_schema(old)?;
        let new_doc = parse_schema(new)?;
        let diff = diff_schemas(&old_doc, &new_doc, old.version, new.version)?;
        let compatibility = diff.classify();

        let affected_documents = if diff.affects_data() {
            self.documents
                .count_documents(&new.tenant, &new.collection)
                .await?
        } else {
            0
        };

        tracing::info!(
            tenant = %new.tenant,
            collection = %new.collection,
            from = old.version,
            to = new.version,
            ?compatibility,
            added = diff.added.len(),
            removed = diff.removed.len(),
            type_changed = diff.type_changed.len(),
            affected_documents,
            "schema compatibility checked"
        );

        Ok(CompatibilityReport {
            from_version: old.version,
            to_version: new.version,
            compatibility,
            diff,
            affected_documents,
        })
    }

    /// Migrate every document of a collection below `target_version`.
    ///
    /// Per-document failures are recorded and skipped; only store failures
    /// and a missing target schema abort the run.
    pub async fn bulk_migrate_collection(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        target_version: u32,
        batch_size: Option<usize>,
    ) -> Result<BulkMigrationReport> {
        let started = Instant::now();
        let batch_size = batch_size.unwrap_or(self.config.batch_size).max(1);

        let versions = self.schemas.list_versions(tenant, collection).await?;
        let Some(target) = versions.iter().find(|s| s.version == target_version).cloned() else {
            return Err(MigrationError::SchemaNotFound {
                tenant: tenant.to_string(),
                collection: collection.to_string(),
                version: target_version,
            });
        };

        let mut report = BulkMigrationReport {
            target_version,
            processed: 0,
            succeeded: 0,
            failed: 0,
            elapsed_ms: 0,
            errors: Vec::new(),
        };
        let mut paths: HashMap<u32, Result<MigrationPath>> = HashMap::new();
        let mut after_id = i64::MIN;

        loop {
            let batch = self
                .documents
                .fetch_batch(tenant, collection, target_version, after_id, batch_size)
                .await?;
            let fetched = batch.len();

            for mut document in batch {
                after_id = after_id.max(document.id);
                report.processed += 1;

                let from = document.effective_version();
                let path = paths
                    .entry(from)
                    .or_insert_with(|| MigrationPath::resolve(&versions, from, target.version));
                let result = match path {
                    Ok(path) => match check_scope(&document, &target) {
                        Ok(()) => apply_path(&mut document, path),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(MigrationError::InvalidSchema {
                        collection: collection.to_string(),
                        version: target_version,
                        detail: e.to_string(),
                    }),
                };
                let result = match result {
                    Ok(_) => self.documents.update_document(&document).await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => report.succeeded += 1,
                    Err(e) => {
                        report.failed += 1;
                        if report.errors.len() < self.config.max_error_samples {
                            report.errors.push(DocumentFailure {
                                document_id: document.id,
                                table: document.table.to_string(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }

            if fetched < batch_size {
                break;
            }
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            tenant = %tenant,
            collection = %collection,
            target_version,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "bulk migration finished"
        );
        Ok(report)
    }

    /// Dry-run the migration to `target_version` on up to `sample` documents.
    pub async fn preview_migration(
        &self,
        tenant: &TenantId,
        collection: &CollectionName,
        target_version: u32,
        sample: usize,
    ) -> Result<Vec<PreviewEntry>> {
        let versions = self.schemas.list_versions(tenant, collection).await?;
        if !versions.iter().any(|s| s.version == target_version) {
            return Err(MigrationError::SchemaNotFound {
                tenant: tenant.to_string(),
                collection: collection.to_string(),
                version: target_version,
            });
        }
        let batch = self
            .documents
            .fetch_batch(tenant, collection, target_version, i64::MIN, sample.max(1))
            .await?;

        let mut entries = Vec::with_capacity(batch.len());
        for document in batch {
            let from = document.effective_version();
            let result = MigrationPath::resolve(&versions, from, target_version)
                .and_then(|path| path.apply(&document.data));
            let (after, error) = match result {
                Ok(after) => (Some(after), None),
                Err(e) => (None, Some(e.to_string())),
            };
            entries.push(PreviewEntry {
                document_id: document.id,
                from_version: from,
                before: document.data,
                after,
                error,
            });
        }
        Ok(entries)
    }
}

/// Swap the migrated copy in only after the whole path succeeded.
fn apply_path(document: &mut Document, path: &MigrationPath) -> Result<MigrationOutcome> {
    let migrated = path.apply(&document.data)?;
    document.data = migrated;
    document.schema_version = Some(path.to);
    Ok(MigrationOutcome::Migrated {
        from: path.from,
        to: path.to,
        transforms_applied: path.transform_count(),
    })
}

fn check_scope(document: &Document, schema: &CollectionSchema) -> Result<()> {
    if document.tenant != schema.tenant || document.collection != schema.collection {
        return Err(MigrationError::ScopeMismatch {
            expected: format!("{}/{}", schema.tenant, schema.collection),
            actual: format!("{}/{}", document.tenant, document.collection),
        });
    }
    Ok(())
}

fn parse_schema(schema: &CollectionSchema) -> Result<docshard_types::SchemaDocument> {
    schema.document().map_err(|e| MigrationError::InvalidSchema {
        collection: schema.collection.to_string(),
        version: schema.version,
        detail: e.to_string(),
    })
}

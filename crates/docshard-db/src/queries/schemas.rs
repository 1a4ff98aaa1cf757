//! Collection schema queries.
//!
//! Versions are append-only. Publishing and activation flip the `active`
//! flag inside one transaction so a collection never has two active
//! versions.

use rusqlite::{Connection, OptionalExtension, Row};

use docshard_types::{CollectionName, CollectionSchema, SchemaDocument, TenantId};

use crate::{DbError, Result};

const COLUMNS: &str = "tenant_id, collection, version, active, locked, system, raw_schema";

struct SchemaRow {
    tenant: String,
    collection: String,
    version: i64,
    active: bool,
    locked: bool,
    system: bool,
    raw: String,
}

impl SchemaRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tenant: row.get(0)?,
            collection: row.get(1)?,
            version: row.get(2)?,
            active: row.get(3)?,
            locked: row.get(4)?,
            system: row.get(5)?,
            raw: row.get(6)?,
        })
    }

    fn into_schema(self) -> Result<CollectionSchema> {
        Ok(CollectionSchema {
            tenant: TenantId::new(self.tenant)?,
            collection: CollectionName::new(self.collection)?,
            version: self.version as u32,
            active: self.active,
            locked: self.locked,
            system: self.system,
            raw: self.raw,
        })
    }
}

/// Store `raw` as the next version and make it active.
///
/// Fails if the current active version is locked or `raw` is not a JSON
/// object.
pub fn publish(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    raw: &str,
    system: bool,
    created_at: u64,
) -> Result<CollectionSchema> {
    SchemaDocument::parse(raw)?;

    let tx = conn.unchecked_transaction()?;
    if let Some(current) = active(&tx, tenant, collection)? {
        if current.locked {
            return Err(DbError::Constraint(format!(
                "schema {collection} v{} is locked",
                current.version
            )));
        }
    }

    let version: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) + 1 FROM collection_schemas
         WHERE tenant_id = ?1 AND collection = ?2",
        [tenant.as_str(), collection.as_str()],
        |row| row.get(0),
    )?;
    tx.execute(
        "UPDATE collection_schemas SET active = 0 WHERE tenant_id = ?1 AND collection = ?2",
        [tenant.as_str(), collection.as_str()],
    )?;
    tx.execute(
        "INSERT INTO collection_schemas
         (tenant_id, collection, version, active, locked, system, raw_schema, created_at)
         VALUES (?1, ?2, ?3, 1, 0, ?4, ?5, ?6)",
        rusqlite::params![
            tenant.as_str(),
            collection.as_str(),
            version,
            system,
            raw,
            created_at as i64,
        ],
    )?;
    tx.commit()?;

    Ok(CollectionSchema {
        tenant: tenant.clone(),
        collection: collection.clone(),
        version: version as u32,
        active: true,
        locked: false,
        system,
        raw: raw.to_string(),
    })
}

/// Make an existing version the active one.
///
/// Rolling back is allowed only while no live document of the collection is
/// tagged with a newer version than `version`.
pub fn activate(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    version: u32,
) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let newest_tag: Option<i64> = tx.query_row(
        "SELECT MAX(schema_version) FROM documents
         WHERE tenant_id = ?1 AND collection = ?2 AND deleted_at IS NULL",
        [tenant.as_str(), collection.as_str()],
        |row| row.get(0),
    )?;
    if let Some(tag) = newest_tag.filter(|tag| *tag > i64::from(version)) {
        return Err(DbError::Constraint(format!(
            "documents in {collection} are already at v{tag}, cannot activate v{version}"
        )));
    }
    tx.execute(
        "UPDATE collection_schemas SET active = 0 WHERE tenant_id = ?1 AND collection = ?2",
        [tenant.as_str(), collection.as_str()],
    )?;
    let updated = tx.execute(
        "UPDATE collection_schemas SET active = 1
         WHERE tenant_id = ?1 AND collection = ?2 AND version = ?3",
        rusqlite::params![tenant.as_str(), collection.as_str(), version],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("schema {collection} v{version}")));
    }
    tx.commit()?;
    Ok(())
}

/// Lock or unlock one version.
pub fn set_locked(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    version: u32,
    locked: bool,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE collection_schemas SET locked = ?4
         WHERE tenant_id = ?1 AND collection = ?2 AND version = ?3",
        rusqlite::params![tenant.as_str(), collection.as_str(), version, locked],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("schema {collection} v{version}")));
    }
    Ok(())
}

pub fn get(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    version: u32,
) -> Result<Option<CollectionSchema>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM collection_schemas
             WHERE tenant_id = ?1 AND collection = ?2 AND version = ?3"
        ),
        rusqlite::params![tenant.as_str(), collection.as_str(), version],
        SchemaRow::from_row,
    )
    .optional()?
    .map(SchemaRow::into_schema)
    .transpose()
}

pub fn active(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
) -> Result<Option<CollectionSchema>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM collection_schemas
             WHERE tenant_id = ?1 AND collection = ?2 AND active = 1"
        ),
        [tenant.as_str(), collection.as_str()],
        SchemaRow::from_row,
    )
    .optional()?
    .map(SchemaRow::into_schema)
    .transpose()
}

/// Every version of a collection, oldest first.
pub fn list(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
) -> Result<Vec<CollectionSchema>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM collection_schemas
         WHERE tenant_id = ?1 AND collection = ?2 ORDER BY version"
    ))?;
    let rows = stmt
        .query_map([tenant.as_str(), collection.as_str()], SchemaRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(SchemaRow::into_schema).collect()
}

/// Active schema of every collection a tenant owns.
pub fn list_active(conn: &Connection, tenant: &TenantId) -> Result<Vec<CollectionSchema>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM collection_schemas
         WHERE tenant_id = ?1 AND active = 1 ORDER BY collection"
    ))?;
    let rows = stmt
        .query_map([tenant.as_str()], SchemaRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(SchemaRow::into_schema).collect()
}

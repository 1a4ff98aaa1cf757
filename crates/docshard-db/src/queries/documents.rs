//! Document queries.
//!
//! Only live rows (`deleted_at IS NULL`) are visible to readers. An untagged
//! `schema_version` reads as version 1.

use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;

use docshard_types::{CollectionName, Document, TableName, TenantId};

use crate::{DbError, Result};

const COLUMNS: &str = "id, tenant_id, collection, table_name, data, schema_version";

struct DocumentRow {
    id: i64,
    tenant: String,
    collection: String,
    table: String,
    data: String,
    schema_version: Option<i64>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant: row.get(1)?,
            collection: row.get(2)?,
            table: row.get(3)?,
            data: row.get(4)?,
            schema_version: row.get(5)?,
        })
    }

    fn into_document(self) -> Result<Document> {
        let data: Value = serde_json::from_str(&self.data)
            .map_err(|e| DbError::Serialization(format!("document {}: {e}", self.id)))?;
        Ok(Document {
            id: self.id,
            tenant: TenantId::new(self.tenant)?,
            collection: CollectionName::new(self.collection)?,
            table: TableName::new(self.table)?,
            data,
            schema_version: self.schema_version.map(|v| v as u32),
        })
    }
}

fn encode(data: &Value) -> Result<String> {
    serde_json::to_string(data).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Insert a document and return its id.
pub fn insert(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    table: &TableName,
    data: &Value,
    schema_version: Option<u32>,
    now: u64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO documents
         (tenant_id, collection, table_name, data, schema_version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        rusqlite::params![
            tenant.as_str(),
            collection.as_str(),
            table.as_str(),
            encode(data)?,
            schema_version,
            now as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    table: &TableName,
    id: i64,
) -> Result<Option<Document>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM documents
             WHERE id = ?1 AND tenant_id = ?2 AND collection = ?3 AND table_name = ?4
               AND deleted_at IS NULL"
        ),
        rusqlite::params![id, tenant.as_str(), collection.as_str(), table.as_str()],
        DocumentRow::from_row,
    )
    .optional()?
    .map(DocumentRow::into_document)
    .transpose()
}

/// Overwrite data and version of a live document.
pub fn update(conn: &Connection, document: &Document, now: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE documents SET data = ?1, schema_version = ?2, updated_at = ?3
         WHERE id = ?4 AND tenant_id = ?5 AND collection = ?6 AND table_name = ?7
           AND deleted_at IS NULL",
        rusqlite::params![
            encode(&document.data)?,
            document.schema_version,
            now as i64,
            document.id,
            document.tenant.as_str(),
            document.collection.as_str(),
            document.table.as_str(),
        ],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("document {}", document.id)));
    }
    Ok(())
}

/// Soft-delete a document. Returns whether a live row was deleted.
pub fn soft_delete(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    table: &TableName,
    id: i64,
    now: u64,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE documents SET deleted_at = ?1
         WHERE id = ?2 AND tenant_id = ?3 AND collection = ?4 AND table_name = ?5
           AND deleted_at IS NULL",
        rusqlite::params![now as i64, id, tenant.as_str(), collection.as_str(), table.as_str()],
    )?;
    Ok(updated > 0)
}

/// Live documents in a collection.
pub fn count(conn: &Connection, tenant: &TenantId, collection: &CollectionName) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents
         WHERE tenant_id = ?1 AND collection = ?2 AND deleted_at IS NULL",
        [tenant.as_str(), collection.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Keyset page of live documents below `below_version`, ordered by id.
pub fn fetch_batch(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    below_version: u32,
    after_id: i64,
    limit: usize,
) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM documents
         WHERE tenant_id = ?1 AND collection = ?2 AND deleted_at IS NULL
           AND COALESCE(schema_version, 1) < ?3 AND id > ?4
         ORDER BY id LIMIT ?5"
    ))?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                tenant.as_str(),
                collection.as_str(),
                below_version,
                after_id,
                limit as i64,
            ],
            DocumentRow::from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(DocumentRow::into_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn scope() -> (TenantId, CollectionName, TableName) {
        (
            TenantId::new("acme").expect("tenant"),
            CollectionName::new("shop").expect("collection"),
            TableName::new("orders").expect("table"),
        )
    }

    #[test]
    fn test_insert_get_update() {
        let conn = test_db();
        let (t, c, tbl) = scope();
        let id = insert(&conn, &t, &c, &tbl, &json!({"sku": "A1"}), None, 1).expect("insert");

        let mut doc = get(&conn, &t, &c, &tbl, id).expect("get").expect("present");
        assert_eq!(doc.data, json!({"sku": "A1"}));
        assert_eq!(doc.effective_version(), 1);

        doc.data = json!({"sku": "A1", "qty": 2});
        doc.schema_version = Some(2);
        update(&conn, &doc, 2).expect("update");
        let reread = get(&conn, &t, &c, &tbl, id).expect("get").expect("present");
        assert_eq!(reread, doc);
    }

    #[test]
    fn test_soft_deleted_rows_are_hidden() {
        let conn = test_db();
        let (t, c, tbl) = scope();
        let id = insert(&conn, &t, &c, &tbl, &json!({}), Some(1), 1).expect("insert");
        assert!(soft_delete(&conn, &t, &c, &tbl, id, 2).expect("delete"));
        assert!(!soft_delete(&conn, &t, &c, &tbl, id, 3).expect("second delete"));
        assert!(get(&conn, &t, &c, &tbl, id).expect("get").is_none());
        assert_eq!(count(&conn, &t, &c).expect("count"), 0);
    }

    #[test]
    fn test_fetch_batch_filters_and_pages() {
        let conn = test_db();
        let (t, c, tbl) = scope();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(insert(&conn, &t, &c, &tbl, &json!({"n": i}), None, 1).expect("insert"));
        }
        insert(&conn, &t, &c, &tbl, &json!({"n": 99}), Some(3), 1).expect("current doc");

        let first = fetch_batch(&conn, &t, &c, 3, i64::MIN, 3).expect("page 1");
        assert_eq!(first.iter().map(|d| d.id).collect::<Vec<_>>(), ids[..3]);
        let second = fetch_batch(&conn, &t, &c, 3, ids[2], 3).expect("page 2");
        assert_eq!(second.iter().map(|d| d.id).collect::<Vec<_>>(), ids[3..]);
    }

    #[test]
    fn test_update_missing_document() {
        let conn = test_db();
        let (t, c, tbl) = scope();
        let doc = Document {
            id: 42,
            tenant: t,
            collection: c,
            table: tbl,
            data: json!({}),
            schema_version: Some(1),
        };
        assert!(matches!(update(&conn, &doc, 1), Err(DbError::NotFound(_))));
    }
}

//! Virtual index metadata queries.

use rusqlite::{Connection, OptionalExtension, Row};

use docshard_types::{CollectionName, TableName, TenantId, VirtualIndex};

use crate::{DbError, Result};

const COLUMNS: &str = "id, tenant_id, collection, table_name, name, physical_name, fields,
     partial_predicate, is_unique, method, partition_table, created_at, dropped_at";

struct IndexRow {
    id: i64,
    tenant: String,
    collection: String,
    table: String,
    name: String,
    physical_name: String,
    fields: String,
    partial: Option<String>,
    unique: bool,
    method: String,
    partition: String,
    created_at: i64,
    dropped_at: Option<i64>,
}

impl IndexRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant: row.get(1)?,
            collection: row.get(2)?,
            table: row.get(3)?,
            name: row.get(4)?,
            physical_name: row.get(5)?,
            fields: row.get(6)?,
            partial: row.get(7)?,
            unique: row.get(8)?,
            method: row.get(9)?,
            partition: row.get(10)?,
            created_at: row.get(11)?,
            dropped_at: row.get(12)?,
        })
    }

    fn into_index(self) -> Result<VirtualIndex> {
        let fields: Vec<String> = serde_json::from_str(&self.fields)
            .map_err(|e| DbError::Serialization(format!("index {} fields: {e}", self.name)))?;
        Ok(VirtualIndex {
            id: self.id,
            tenant: TenantId::new(self.tenant)?,
            collection: CollectionName::new(self.collection)?,
            table: TableName::new(self.table)?,
            name: self.name,
            physical_name: self.physical_name,
            fields,
            partial: self.partial,
            unique: self.unique,
            method: self.method.parse().map_err(DbError::Serialization)?,
            partition: self.partition,
            created_at: self.created_at as u64,
            dropped_at: self.dropped_at.map(|t| t as u64),
        })
    }
}

fn collect(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<VirtualIndex>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, IndexRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(IndexRow::into_index).collect()
}

/// Insert a metadata row and return its id.
pub fn insert(conn: &Connection, index: &VirtualIndex) -> Result<i64> {
    let fields =
        serde_json::to_string(&index.fields).map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO virtual_indexes
         (tenant_id, collection, table_name, name, physical_name, fields,
          partial_predicate, is_unique, method, partition_table, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            index.tenant.as_str(),
            index.collection.as_str(),
            index.table.as_str(),
            index.name,
            index.physical_name,
            fields,
            index.partial,
            index.unique,
            index.method.as_str(),
            index.partition,
            index.created_at as i64,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("live index '{}' already exists", index.name))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(conn.last_insert_rowid())
}

/// Live indexes of a tenant, optionally for one collection.
pub fn list_live(
    conn: &Connection,
    tenant: &TenantId,
    collection: Option<&CollectionName>,
) -> Result<Vec<VirtualIndex>> {
    match collection {
        Some(collection) => collect(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM virtual_indexes
                 WHERE tenant_id = ?1 AND collection = ?2 AND dropped_at IS NULL
                 ORDER BY collection, name"
            ),
            [tenant.as_str(), collection.as_str()],
        ),
        None => collect(
            conn,
            &format!(
                "SELECT {COLUMNS} FROM virtual_indexes
                 WHERE tenant_id = ?1 AND dropped_at IS NULL
                 ORDER BY collection, name"
            ),
            [tenant.as_str()],
        ),
    }
}

/// Every row for a collection, dropped ones included, oldest first.
pub fn history(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
) -> Result<Vec<VirtualIndex>> {
    collect(
        conn,
        &format!(
            "SELECT {COLUMNS} FROM virtual_indexes
             WHERE tenant_id = ?1 AND collection = ?2 ORDER BY id"
        ),
        [tenant.as_str(), collection.as_str()],
    )
}

pub fn find_live(
    conn: &Connection,
    tenant: &TenantId,
    collection: &CollectionName,
    name: &str,
) -> Result<Option<VirtualIndex>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM virtual_indexes
             WHERE tenant_id = ?1 AND collection = ?2 AND name = ?3 AND dropped_at IS NULL"
        ),
        [tenant.as_str(), collection.as_str(), name],
        IndexRow::from_row,
    )
    .optional()?
    .map(IndexRow::into_index)
    .transpose()
}

pub fn count_live(conn: &Connection, tenant: &TenantId) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM virtual_indexes WHERE tenant_id = ?1 AND dropped_at IS NULL",
        [tenant.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Soft-delete a live row.
pub fn mark_dropped(conn: &Connection, id: i64, dropped_at: u64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE virtual_indexes SET dropped_at = ?1 WHERE id = ?2 AND dropped_at IS NULL",
        rusqlite::params![dropped_at as i64, id],
    )?;
    if updated == 0 {
        return Err(DbError::NotFound(format!("live virtual index {id}")));
    }
    Ok(())
}

/// Whether SQLite currently has a physical index called `physical_name`.
pub fn physical_exists(conn: &Connection, physical_name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
        [physical_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshard_types::IndexMethod;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn index(name: &str) -> VirtualIndex {
        VirtualIndex {
            id: 0,
            tenant: TenantId::new("acme").expect("tenant"),
            collection: CollectionName::new("shop").expect("collection"),
            table: TableName::new("orders").expect("table"),
            name: name.to_string(),
            physical_name: format!("vidx_{name}"),
            fields: vec!["customer.id".to_string(), "created_at".to_string()],
            partial: Some("{status} = 'open'".to_string()),
            unique: true,
            method: IndexMethod::Hash,
            partition: "documents".to_string(),
            created_at: 10,
            dropped_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let conn = test_db();
        let wanted = index("by_customer");
        let id = insert(&conn, &wanted).expect("insert");
        let found = find_live(&conn, &wanted.tenant, &wanted.collection, "by_customer")
            .expect("find")
            .expect("present");
        assert_eq!(found, VirtualIndex { id, ..wanted });
    }

    #[test]
    fn test_drop_keeps_history() {
        let conn = test_db();
        let wanted = index("by_customer");
        let id = insert(&conn, &wanted).expect("insert");
        mark_dropped(&conn, id, 20).expect("drop");
        assert!(matches!(mark_dropped(&conn, id, 21), Err(DbError::NotFound(_))));

        assert_eq!(count_live(&conn, &wanted.tenant).expect("count"), 0);
        let rows = history(&conn, &wanted.tenant, &wanted.collection).expect("history");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dropped_at, Some(20));

        // The name is free again once dropped.
        insert(&conn, &wanted).expect("reinsert");
        assert_eq!(count_live(&conn, &wanted.tenant).expect("count"), 1);
    }

    #[test]
    fn test_physical_exists_reads_sqlite_master() {
        let conn = test_db();
        assert!(!physical_exists(&conn, "vidx_lookup_target").expect("absent"));
        conn.execute_batch("CREATE INDEX vidx_lookup_target ON documents(created_at)")
            .expect("create");
        assert!(physical_exists(&conn, "vidx_lookup_target").expect("present"));
        assert!(physical_exists(&conn, "idx_documents_scope").expect("builtin"));
    }

    #[test]
    fn test_duplicate_live_name_is_constraint() {
        let conn = test_db();
        insert(&conn, &index("by_customer")).expect("insert");
        assert!(matches!(
            insert(&conn, &index("by_customer")),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_list_live_by_collection() {
        let conn = test_db();
        let a = index("a");
        insert(&conn, &a).expect("a");
        let mut other = index("b");
        other.collection = CollectionName::new("crm").expect("collection");
        insert(&conn, &other).expect("b");

        assert_eq!(list_live(&conn, &a.tenant, None).expect("all").len(), 2);
        let shop = list_live(&conn, &a.tenant, Some(&a.collection)).expect("shop");
        assert_eq!(shop.len(), 1);
        assert_eq!(shop[0].name, "a");
    }
}

//! Durable sequence cursors.

use rusqlite::{Connection, OptionalExtension};

use docshard_sequence::{BlockRange, NodeId};
use docshard_types::SequenceKey;

use crate::{DbError, Result};

/// Stored state of one key's cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRow {
    /// First ID of the next block to be handed out.
    pub next_start: u64,
    pub last_node: String,
    pub updated_at: u64,
}

/// Reserve the next `size` IDs for `key`.
///
/// A single `INSERT .. ON CONFLICT DO UPDATE .. RETURNING` statement both
/// advances the cursor and reports the new position, so concurrent
/// reservations on any connection are serialized by SQLite itself. The
/// first block for a key starts at 1.
pub fn reserve(
    conn: &Connection,
    key: &SequenceKey,
    node: &NodeId,
    size: u64,
    now: u64,
) -> Result<BlockRange> {
    let size = i64::try_from(size)
        .map_err(|_| DbError::Constraint(format!("block size {size} out of range")))?;
    let next_start: i64 = conn.query_row(
        "INSERT INTO sequence_cursors
         (tenant_id, collection, table_name, next_start, last_node, updated_at)
         VALUES (?1, ?2, ?3, 1 + ?4, ?5, ?6)
         ON CONFLICT (tenant_id, collection, table_name) DO UPDATE SET
             next_start = sequence_cursors.next_start + ?4,
             last_node = excluded.last_node,
             updated_at = excluded.updated_at
         RETURNING next_start",
        rusqlite::params![
            key.tenant.as_str(),
            key.collection.as_str(),
            key.table.as_str(),
            size,
            node.as_str(),
            now as i64,
        ],
        |row| row.get(0),
    )?;
    Ok(BlockRange {
        start: (next_start - size) as u64,
        end: next_start as u64,
    })
}

pub fn cursor(conn: &Connection, key: &SequenceKey) -> Result<Option<CursorRow>> {
    let row = conn
        .query_row(
            "SELECT next_start, last_node, updated_at FROM sequence_cursors
             WHERE tenant_id = ?1 AND collection = ?2 AND table_name = ?3",
            [key.tenant.as_str(), key.collection.as_str(), key.table.as_str()],
            |row| {
                Ok(CursorRow {
                    next_start: row.get::<_, i64>(0)? as u64,
                    last_node: row.get(1)?,
                    updated_at: row.get::<_, i64>(2)? as u64,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshard_types::{CollectionName, TableName, TenantId};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn key(table: &str) -> SequenceKey {
        SequenceKey::new(
            TenantId::new("acme").expect("tenant"),
            CollectionName::new("shop").expect("collection"),
            TableName::new(table).expect("table"),
        )
    }

    #[test]
    fn test_first_block_starts_at_one() {
        let conn = test_db();
        let node = NodeId::new("node-a").expect("node");
        let range = reserve(&conn, &key("orders"), &node, 10_000, 1).expect("reserve");
        assert_eq!(range, BlockRange { start: 1, end: 10_001 });
    }

    #[test]
    fn test_blocks_are_contiguous_and_disjoint() {
        let conn = test_db();
        let a = NodeId::new("node-a").expect("node");
        let b = NodeId::new("node-b").expect("node");
        let orders = key("orders");

        let first = reserve(&conn, &orders, &a, 100, 1).expect("first");
        let second = reserve(&conn, &orders, &b, 100, 2).expect("second");
        let third = reserve(&conn, &orders, &a, 50, 3).expect("third");
        assert_eq!(second.start, first.end);
        assert_eq!(third, BlockRange { start: 201, end: 251 });

        let row = cursor(&conn, &orders).expect("cursor").expect("present");
        assert_eq!(row.next_start, 251);
        assert_eq!(row.last_node, "node-a");
        assert_eq!(row.updated_at, 3);
    }

    #[test]
    fn test_keys_have_separate_cursors() {
        let conn = test_db();
        let node = NodeId::new("node-a").expect("node");
        reserve(&conn, &key("orders"), &node, 10, 1).expect("orders");
        let items = reserve(&conn, &key("items"), &node, 10, 1).expect("items");
        assert_eq!(items.start, 1);
        assert!(cursor(&conn, &key("other")).expect("cursor").is_none());
    }
}

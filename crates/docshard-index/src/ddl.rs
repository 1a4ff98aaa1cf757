//! DDL generation for virtual indexes.
//!
//! Every index is an expression index over the JSON text extraction of each
//! field, restricted by a predicate that always excludes soft-deleted rows
//! and scopes to the owning collection and table. Shared partitions add a
//! tenant filter. Postgres builds use `CONCURRENTLY` so live traffic is
//! never locked out.

use docshard_types::{CollectionName, IndexMethod, Partition, TenantId};
use serde::{Deserialize, Serialize};

use crate::definition::{valid_path, IndexDefinition};
use crate::{IndexError, Result};

/// SQL flavour of the backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

/// Deterministic physical name for a logical definition.
///
/// The same (tenant, collection, table, fields, predicate, uniqueness,
/// method) always maps to the same name, so re-declaring an index never
/// creates a second physical object.
pub fn physical_name(tenant: &TenantId, collection: &CollectionName, def: &IndexDefinition) -> String {
    let fields = def.fields.join("\u{1e}");
    let mut hasher = blake3::Hasher::new();
    for part in [
        tenant.as_str(),
        collection.as_str(),
        def.table.as_str(),
        fields.as_str(),
        def.partial.as_deref().unwrap_or(""),
        if def.unique { "unique" } else { "" },
        def.method.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(&[0x1f]);
    }
    let digest = hasher.finalize();
    format!("vidx_{}", hex::encode(&digest.as_bytes()[..12]))
}

/// Text extraction expression for a dotted document path.
pub fn field_expr(dialect: SqlDialect, path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    match dialect {
        SqlDialect::Postgres if segments.len() == 1 => format!("(data->>'{path}')"),
        SqlDialect::Postgres => format!("(data#>>'{{{}}}')", segments.join(",")),
        SqlDialect::Sqlite => format!("json_extract(data, '$.{path}')"),
    }
}

/// JSON (not text) expression, used by GIN indexes.
fn json_expr(path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() == 1 {
        format!("(data->'{path}')")
    } else {
        format!("(data#>'{{{}}}')", segments.join(","))
    }
}

/// Render a user predicate, replacing `{field}` placeholders with extraction
/// expressions.
///
/// Statement separators and comments are rejected. Outside string literals
/// parentheses must balance and never close below the starting depth, so the
/// rendered text stays inside the `(...)` the caller wraps it in. Braces
/// inside `'...'` literals are kept as text.
pub fn render_partial(dialect: SqlDialect, partial: &str) -> Result<String> {
    let reject = |detail: &str| IndexError::InvalidPartial(format!("{detail}: {partial}"));
    if partial.contains(';') || partial.contains("--") || partial.contains("/*") || partial.contains("*/") {
        return Err(reject("statement separators and comments are not allowed"));
    }

    let mut out = String::with_capacity(partial.len());
    let mut in_literal = false;
    let mut depth = 0usize;
    let mut chars = partial.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            // A doubled '' inside a literal toggles twice and stays inside.
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            _ if in_literal => out.push(c),
            '(' => {
                depth += 1;
                out.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| reject("')' closes more than it opens"))?;
                out.push(c);
            }
            '{' => {
                let after = &partial[at + 1..];
                let close = after.find('}').ok_or_else(|| reject("unclosed placeholder"))?;
                let field = after[..close].trim();
                if !valid_path(field) {
                    return Err(reject("invalid placeholder field"));
                }
                out.push_str(&field_expr(dialect, field));
                // Skip the placeholder body and its closing brace.
                for _ in 0..=after[..close].chars().count() {
                    chars.next();
                }
            }
            '}' => return Err(reject("unmatched '}'")),
            _ => out.push(c),
        }
    }
    if in_literal {
        return Err(reject("unbalanced quotes"));
    }
    if depth != 0 {
        return Err(reject("unbalanced parentheses"));
    }
    Ok(out)
}

/// Full WHERE predicate for an index on `partition`.
pub fn predicate(
    dialect: SqlDialect,
    tenant: &TenantId,
    collection: &CollectionName,
    def: &IndexDefinition,
    partition: &Partition,
) -> Result<String> {
    let mut clauses = vec![
        "deleted_at IS NULL".to_string(),
        format!("collection = {}", quote_literal(collection.as_str())),
        format!("table_name = {}", quote_literal(def.table.as_str())),
    ];
    if partition.is_shared() {
        clauses.push(format!("tenant_id = {}", quote_literal(tenant.as_str())));
    }
    if let Some(partial) = &def.partial {
        clauses.push(format!("({})", render_partial(dialect, partial)?));
    }
    Ok(clauses.join(" AND "))
}

/// `CREATE INDEX` statement for a virtual index.
pub fn create_index_sql(
    dialect: SqlDialect,
    tenant: &TenantId,
    collection: &CollectionName,
    def: &IndexDefinition,
    partition: &Partition,
    physical_name: &str,
) -> Result<String> {
    def.validate()?;
    let unique = if def.unique { "UNIQUE " } else { "" };
    let predicate = predicate(dialect, tenant, collection, def, partition)?;

    let sql = match dialect {
        SqlDialect::Postgres => {
            let columns: Vec<String> = def
                .fields
                .iter()
                .map(|f| match def.method {
                    IndexMethod::Gin => json_expr(f),
                    _ => field_expr(dialect, f),
                })
                .collect();
            format!(
                "CREATE {unique}INDEX CONCURRENTLY IF NOT EXISTS {} ON {} USING {} ({}) WHERE {predicate}",
                quote_ident(physical_name),
                quote_ident(partition.table()),
                def.method.as_str(),
                columns.join(", "),
            )
        }
        SqlDialect::Sqlite => {
            if def.method != IndexMethod::Btree {
                tracing::warn!(
                    index = %def.name,
                    method = %def.method,
                    "sqlite has no alternative index methods; building a plain index"
                );
            }
            let columns: Vec<String> = def.fields.iter().map(|f| field_expr(dialect, f)).collect();
            format!(
                "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({}) WHERE {predicate}",
                quote_ident(physical_name),
                quote_ident(partition.table()),
                columns.join(", "),
            )
        }
    };
    Ok(sql)
}

/// `DROP INDEX` statement; succeeds if the index is already gone.
pub fn drop_index_sql(dialect: SqlDialect, physical_name: &str) -> String {
    match dialect {
        SqlDialect::Postgres => format!(
            "DROP INDEX CONCURRENTLY IF EXISTS {}",
            quote_ident(physical_name)
        ),
        SqlDialect::Sqlite => format!("DROP INDEX IF EXISTS {}", quote_ident(physical_name)),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docshard_types::TableName;

    fn tenant() -> TenantId {
        TenantId::new("t1").expect("tenant")
    }

    fn collection() -> CollectionName {
        CollectionName::new("shop").expect("collection")
    }

    fn def(fields: &[&str], partial: Option<&str>) -> IndexDefinition {
        IndexDefinition {
            table: TableName::new("orders").expect("table"),
            name: "by_customer".to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            partial: partial.map(str::to_string),
            unique: false,
            method: IndexMethod::Btree,
        }
    }

    fn shared() -> Partition {
        Partition::Shared {
            table: "documents".to_string(),
        }
    }

    #[test]
    fn test_physical_name_is_deterministic() {
        let a = physical_name(&tenant(), &collection(), &def(&["customer_id"], None));
        let b = physical_name(&tenant(), &collection(), &def(&["customer_id"], None));
        assert_eq!(a, b);
        assert!(a.starts_with("vidx_"));
        assert_eq!(a.len(), 5 + 24);

        let other_tenant = physical_name(
            &TenantId::new("t2").expect("tenant"),
            &collection(),
            &def(&["customer_id"], None),
        );
        let with_partial = physical_name(
            &tenant(),
            &collection(),
            &def(&["customer_id"], Some("{status} = 'open'")),
        );
        assert_ne!(a, other_tenant);
        assert_ne!(a, with_partial);
    }

    #[test]
    fn test_postgres_create_on_shared_partition() {
        let sql = create_index_sql(
            SqlDialect::Postgres,
            &tenant(),
            &collection(),
            &def(&["customer_id", "address.zip"], Some("{status} = 'open'")),
            &shared(),
            "vidx_abc",
        )
        .expect("sql");
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS \"vidx_abc\" ON \"documents\" USING btree \
             ((data->>'customer_id'), (data#>>'{address,zip}')) WHERE deleted_at IS NULL \
             AND collection = 'shop' AND table_name = 'orders' AND tenant_id = 't1' \
             AND ((data->>'status') = 'open')"
        );
    }

    #[test]
    fn test_dedicated_partition_has_no_tenant_filter() {
        let sql = create_index_sql(
            SqlDialect::Postgres,
            &tenant(),
            &collection(),
            &def(&["sku"], None),
            &Partition::Dedicated {
                table: "documents_t1".to_string(),
            },
            "vidx_abc",
        )
        .expect("sql");
        assert!(sql.contains("ON \"documents_t1\""));
        assert!(!sql.contains("tenant_id"));
    }

    #[test]
    fn test_sqlite_create_and_drop() {
        let mut unique = def(&["email"], None);
        unique.unique = true;
        let sql = create_index_sql(
            SqlDialect::Sqlite,
            &tenant(),
            &collection(),
            &unique,
            &shared(),
            "vidx_abc",
        )
        .expect("sql");
        assert!(sql.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS \"vidx_abc\" ON \"documents\""));
        assert!(sql.contains("json_extract(data, '$.email')"));
        assert!(!sql.contains("CONCURRENTLY"));

        assert_eq!(
            drop_index_sql(SqlDialect::Postgres, "vidx_abc"),
            "DROP INDEX CONCURRENTLY IF EXISTS \"vidx_abc\""
        );
        assert_eq!(
            drop_index_sql(SqlDialect::Sqlite, "vidx_abc"),
            "DROP INDEX IF EXISTS \"vidx_abc\""
        );
    }

    #[test]
    fn test_partial_rejects_injection() {
        for bad in [
            "{a} = 1; DROP TABLE documents",
            "{a} = 1 -- comment",
            "{a} = 'open",
            "{a b} = 1",
            "{a = 1",
            "a} = 1",
            "1=1) OR (1=1",
            "({a} = 1",
            ")",
        ] {
            assert!(
                render_partial(SqlDialect::Postgres, bad).is_err(),
                "should reject {bad}"
            );
        }
    }

    #[test]
    fn test_partial_stays_inside_scope() {
        let sql = create_index_sql(
            SqlDialect::Postgres,
            &TenantId::new("acme").expect("tenant"),
            &collection(),
            &def(&["sku"], Some("1=1) OR (1=1")),
            &shared(),
            "vidx_abc",
        );
        assert!(matches!(sql, Err(IndexError::InvalidPartial(_))));

        let nested = render_partial(SqlDialect::Postgres, "({a} = 1 OR ({b} = 2))").expect("nested");
        assert_eq!(nested, "((data->>'a') = 1 OR ((data->>'b') = 2))");
    }

    #[test]
    fn test_literals_are_left_alone() {
        let rendered = render_partial(SqlDialect::Sqlite, "{status} = '{x}' OR {note} = 'a) OR (b'")
            .expect("render");
        assert_eq!(
            rendered,
            "json_extract(data, '$.status') = '{x}' OR json_extract(data, '$.note') = 'a) OR (b'"
        );

        let escaped = render_partial(SqlDialect::Postgres, "{name} = 'O''Brien'").expect("escaped");
        assert_eq!(escaped, "(data->>'name') = 'O''Brien'");
    }

    #[test]
    fn test_gin_uses_json_expression() {
        let mut gin = def(&["tags"], None);
        gin.method = IndexMethod::Gin;
        let sql = create_index_sql(
            SqlDialect::Postgres,
            &tenant(),
            &collection(),
            &gin,
            &shared(),
            "vidx_abc",
        )
        .expect("sql");
        assert!(sql.contains("USING gin ((data->'tags'))"));
    }
}

//! SQL schema definitions.

/// Initial schema (v1).
pub const SCHEMA_V1: &str = r#"
-- Tenants and their billing tier.
CREATE TABLE IF NOT EXISTS tenants (
    tenant_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL DEFAULT 'free' CHECK(tier IN ('free', 'standard', 'enterprise')),
    created_at INTEGER NOT NULL
);

-- Versioned collection schemas. Exactly one version per collection is active.
CREATE TABLE IF NOT EXISTS collection_schemas (
    tenant_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    version INTEGER NOT NULL CHECK(version >= 1),
    active INTEGER NOT NULL DEFAULT 0,
    locked INTEGER NOT NULL DEFAULT 0,
    system INTEGER NOT NULL DEFAULT 0,
    raw_schema TEXT NOT NULL CHECK(json_valid(raw_schema)),
    created_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, collection, version)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_collection_schemas_active
    ON collection_schemas(tenant_id, collection) WHERE active = 1;

-- Shared document partition. Soft-deleted rows keep their data.
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    table_name TEXT NOT NULL,
    data TEXT NOT NULL CHECK(json_valid(data)),
    schema_version INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    deleted_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_documents_scope
    ON documents(tenant_id, collection, id) WHERE deleted_at IS NULL;

-- Virtual index metadata. Rows are soft-deleted, never removed.
CREATE TABLE IF NOT EXISTS virtual_indexes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    table_name TEXT NOT NULL,
    name TEXT NOT NULL,
    physical_name TEXT NOT NULL,
    fields TEXT NOT NULL CHECK(json_valid(fields)),
    partial_predicate TEXT,
    is_unique INTEGER NOT NULL DEFAULT 0,
    method TEXT NOT NULL DEFAULT 'btree',
    partition_table TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    dropped_at INTEGER
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_virtual_indexes_live_name
    ON virtual_indexes(tenant_id, collection, name) WHERE dropped_at IS NULL;

-- Durable per-key cursor for block reservation.
CREATE TABLE IF NOT EXISTS sequence_cursors (
    tenant_id TEXT NOT NULL,
    collection TEXT NOT NULL,
    table_name TEXT NOT NULL,
    next_start INTEGER NOT NULL CHECK(next_start >= 1),
    last_node TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (tenant_id, collection, table_name)
);
"#;

//! Tenant registry queries.

use rusqlite::{Connection, OptionalExtension};

use docshard_types::{TenantId, Tier};

use crate::{DbError, Result};

/// Register a tenant or change its tier.
pub fn upsert(conn: &Connection, tenant: &TenantId, tier: Tier, created_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO tenants (tenant_id, tier, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (tenant_id) DO UPDATE SET tier = excluded.tier",
        rusqlite::params![tenant.as_str(), tier.as_str(), created_at as i64],
    )?;
    Ok(())
}

/// A tenant's tier. Unregistered tenants are on the free tier.
pub fn tier(conn: &Connection, tenant: &TenantId) -> Result<Tier> {
    let tier: Option<String> = conn
        .query_row(
            "SELECT tier FROM tenants WHERE tenant_id = ?1",
            [tenant.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match tier {
        Some(tier) => tier.parse().map_err(DbError::Serialization),
        None => Ok(Tier::Free),
    }
}
